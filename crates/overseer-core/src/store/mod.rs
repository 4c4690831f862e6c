use async_trait::async_trait;
use thiserror::Error;

use overseer_types::{ContactChannel, Key, LabelSelector, Secret, Task, ToolCall, ToolServer};

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("conflict updating {key}: stale resource version")]
    Conflict { key: String },

    #[error("store error: {message}")]
    Internal { message: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    pub fn conflict(key: impl ToString) -> Self {
        Self::Conflict {
            key: key.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Conflicts are dropped and `AlreadyExists` is handled by idempotent
    /// create; only internal failures are worth a backoff retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Internal { .. })
    }
}

/// The versioned object store holding the controller's record types.
///
/// `update_tool_call_status` enforces optimistic concurrency: the submitted
/// record's `resource_version` must match the stored one or the write is
/// rejected with [`StoreError::Conflict`]. At most one writer per ToolCall
/// wins each round; losers drop their write and rely on the next work item.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_tool_call(&self, key: &Key) -> Result<Option<ToolCall>, StoreError>;

    async fn list_tool_calls(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<ToolCall>, StoreError>;

    /// Replaces the status of an existing ToolCall. The spec and metadata
    /// (other than the bumped `resource_version`) are left untouched.
    async fn update_tool_call_status(&self, tool_call: ToolCall) -> Result<ToolCall, StoreError>;

    async fn get_task(&self, key: &Key) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Task>, StoreError>;

    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_tool_server(&self, key: &Key) -> Result<Option<ToolServer>, StoreError>;

    async fn get_contact_channel(&self, key: &Key) -> Result<Option<ContactChannel>, StoreError>;

    async fn get_secret(&self, key: &Key) -> Result<Option<Secret>, StoreError>;
}
