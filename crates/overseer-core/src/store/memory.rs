use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use overseer_types::{ContactChannel, Key, LabelSelector, Secret, Task, ToolCall, ToolServer};

use super::{ObjectStore, StoreError};

/// In-memory store with the same optimistic-concurrency semantics as the
/// production backend. Used by tests and the demo binary.
#[derive(Default)]
pub struct InMemoryStore {
    tool_calls: RwLock<HashMap<Key, ToolCall>>,
    tasks: RwLock<HashMap<Key, Task>>,
    tool_servers: RwLock<HashMap<Key, ToolServer>>,
    channels: RwLock<HashMap<Key, ContactChannel>>,
    secrets: RwLock<HashMap<Key, Secret>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a ToolCall, assigning it resource version 1.
    pub fn put_tool_call(&self, mut tool_call: ToolCall) {
        let mut map = self.tool_calls.write().unwrap_or_else(|e| e.into_inner());
        if tool_call.meta.resource_version == 0 {
            tool_call.meta.resource_version = 1;
        }
        map.insert(tool_call.meta.key(), tool_call);
    }

    pub fn put_task(&self, mut task: Task) {
        let mut map = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if task.meta.resource_version == 0 {
            task.meta.resource_version = 1;
        }
        map.insert(task.meta.key(), task);
    }

    pub fn put_tool_server(&self, server: ToolServer) {
        let mut map = self.tool_servers.write().unwrap_or_else(|e| e.into_inner());
        map.insert(server.meta.key(), server);
    }

    pub fn put_contact_channel(&self, channel: ContactChannel) {
        let mut map = self.channels.write().unwrap_or_else(|e| e.into_inner());
        map.insert(channel.meta.key(), channel);
    }

    pub fn put_secret(&self, secret: Secret) {
        let mut map = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        map.insert(secret.meta.key(), secret);
    }

    /// Overwrites a Task's status outside optimistic concurrency. Tests use
    /// this to play the sub-agent runner finishing a delegated task.
    pub fn set_task_status(&self, key: &Key, status: overseer_types::TaskStatus) {
        let mut map = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = map.get_mut(key) {
            task.status = status;
            task.meta.resource_version += 1;
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_tool_call(&self, key: &Key) -> Result<Option<ToolCall>, StoreError> {
        let map = self.tool_calls.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn list_tool_calls(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ToolCall>, StoreError> {
        let map = self.tool_calls.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<ToolCall> = map
            .values()
            .filter(|tc| namespace.is_none_or(|ns| tc.meta.namespace == ns))
            .filter(|tc| selector.matches(&tc.meta.labels))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.meta.key().cmp(&b.meta.key()));
        Ok(out)
    }

    async fn update_tool_call_status(&self, tool_call: ToolCall) -> Result<ToolCall, StoreError> {
        let mut map = self.tool_calls.write().unwrap_or_else(|e| e.into_inner());
        let key = tool_call.meta.key();

        let stored = map
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found("ToolCall", &key))?;

        if stored.meta.resource_version != tool_call.meta.resource_version {
            return Err(StoreError::conflict(&key));
        }

        stored.status = tool_call.status;
        stored.meta.resource_version += 1;
        Ok(stored.clone())
    }

    async fn get_task(&self, key: &Key) -> Result<Option<Task>, StoreError> {
        let map = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn list_tasks(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Task>, StoreError> {
        let map = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<Task> = map
            .values()
            .filter(|task| task.meta.namespace == namespace)
            .filter(|task| selector.matches(&task.meta.labels))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.meta.key().cmp(&b.meta.key()));
        Ok(out)
    }

    async fn create_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let mut map = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let key = task.meta.key();

        if map.contains_key(&key) {
            return Err(StoreError::already_exists("Task", &key));
        }

        task.meta.resource_version = 1;
        map.insert(key, task.clone());
        Ok(task)
    }

    async fn get_tool_server(&self, key: &Key) -> Result<Option<ToolServer>, StoreError> {
        let map = self.tool_servers.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn get_contact_channel(&self, key: &Key) -> Result<Option<ContactChannel>, StoreError> {
        let map = self.channels.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    async fn get_secret(&self, key: &Key) -> Result<Option<Secret>, StoreError> {
        let map = self.secrets.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }
}
