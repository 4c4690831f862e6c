//! Scripted collaborators and record builders shared across tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use overseer_types::{
    ChannelType, ContactChannel, ContactChannelSpec, ContactChannelStatus, LABEL_PARENT_TASK,
    ObjectMeta, Secret, SecretKeyRef, SlackConfig, ToolCall, ToolCallSpec, ToolCallStatus,
    ToolRef, ToolServer, ToolServerSpec, ToolType,
};

use crate::caller::{ToolCaller, ToolCallerError};
use crate::humanlayer::{
    ApprovalStatus, ContactStatus, FunctionCallSpec, HumanLayerClient, HumanLayerConfig,
    HumanLayerError, HumanLayerFactory,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Scripted tool caller

/// Plays back scripted responses for `call_tool` and records every call.
pub struct ScriptedToolCaller {
    script: Mutex<VecDeque<Result<String, ToolCallerError>>>,
    fallback: Result<String, ToolCallerError>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedToolCaller {
    pub fn returning(result: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(result.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(ToolCallerError::Execution {
                server: "scripted".to_string(),
                tool: "scripted".to_string(),
                message: message.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn transport_failing(message: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(ToolCallerError::Transport {
                server: "scripted".to_string(),
                tool: "scripted".to_string(),
                message: message.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot response ahead of the fallback.
    pub fn push_response(&self, response: Result<String, ToolCallerError>) {
        lock(&self.script).push_back(response);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ToolCaller for ScriptedToolCaller {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        _args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolCallerError> {
        lock(&self.calls).push((server.to_string(), tool.to_string()));
        if let Some(scripted) = lock(&self.script).pop_front() {
            return scripted;
        }
        self.fallback.clone()
    }
}

// ---------------------------------------------------------------------------
// Scripted human layer

#[derive(Debug, Clone)]
pub struct RecordedApprovalRequest {
    pub config: HumanLayerConfig,
    pub spec: FunctionCallSpec,
}

#[derive(Debug, Clone)]
pub struct RecordedContactRequest {
    pub config: HumanLayerConfig,
    pub message: String,
}

#[derive(Default)]
struct ScriptedHumanLayerInner {
    approval_call_id: Mutex<Option<String>>,
    contact_call_id: Mutex<Option<String>>,
    approval_request_error: Mutex<Option<HumanLayerError>>,
    contact_request_error: Mutex<Option<HumanLayerError>>,
    approval_statuses: Mutex<VecDeque<Result<ApprovalStatus, HumanLayerError>>>,
    contact_statuses: Mutex<VecDeque<Result<ContactStatus, HumanLayerError>>>,
    approval_requests: Mutex<Vec<RecordedApprovalRequest>>,
    contact_requests: Mutex<Vec<RecordedContactRequest>>,
    approval_polls: Mutex<Vec<String>>,
    contact_polls: Mutex<Vec<String>>,
}

/// Factory and client in one: every client it hands out shares the same
/// scripted state, so tests configure the factory and observe all traffic.
#[derive(Clone, Default)]
pub struct ScriptedHumanLayer {
    inner: Arc<ScriptedHumanLayerInner>,
}

impl ScriptedHumanLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval_call_id(self, id: &str) -> Self {
        *lock(&self.inner.approval_call_id) = Some(id.to_string());
        self
    }

    pub fn with_contact_call_id(self, id: &str) -> Self {
        *lock(&self.inner.contact_call_id) = Some(id.to_string());
        self
    }

    pub fn with_approval_request_error(self, error: HumanLayerError) -> Self {
        *lock(&self.inner.approval_request_error) = Some(error);
        self
    }

    pub fn with_contact_request_error(self, error: HumanLayerError) -> Self {
        *lock(&self.inner.contact_request_error) = Some(error);
        self
    }

    /// Queues the next approval poll outcome. An empty queue polls Pending.
    pub fn push_approval_status(&self, status: Result<ApprovalStatus, HumanLayerError>) {
        lock(&self.inner.approval_statuses).push_back(status);
    }

    pub fn push_contact_status(&self, status: Result<ContactStatus, HumanLayerError>) {
        lock(&self.inner.contact_statuses).push_back(status);
    }

    pub fn approval_requests(&self) -> Vec<RecordedApprovalRequest> {
        lock(&self.inner.approval_requests).clone()
    }

    pub fn contact_requests(&self) -> Vec<RecordedContactRequest> {
        lock(&self.inner.contact_requests).clone()
    }

    pub fn approval_polls(&self) -> Vec<String> {
        lock(&self.inner.approval_polls).clone()
    }

    pub fn contact_polls(&self) -> Vec<String> {
        lock(&self.inner.contact_polls).clone()
    }
}

impl HumanLayerFactory for ScriptedHumanLayer {
    fn client(&self, config: HumanLayerConfig) -> Arc<dyn HumanLayerClient> {
        Arc::new(ScriptedHumanLayerClient {
            inner: self.inner.clone(),
            config,
        })
    }
}

struct ScriptedHumanLayerClient {
    inner: Arc<ScriptedHumanLayerInner>,
    config: HumanLayerConfig,
}

#[async_trait]
impl HumanLayerClient for ScriptedHumanLayerClient {
    async fn request_approval(&self, spec: &FunctionCallSpec) -> Result<String, HumanLayerError> {
        if let Some(error) = lock(&self.inner.approval_request_error).clone() {
            return Err(error);
        }
        lock(&self.inner.approval_requests).push(RecordedApprovalRequest {
            config: self.config.clone(),
            spec: spec.clone(),
        });
        Ok(lock(&self.inner.approval_call_id)
            .clone()
            .unwrap_or_else(|| "hl-approval".to_string()))
    }

    async fn get_approval_status(
        &self,
        external_call_id: &str,
    ) -> Result<ApprovalStatus, HumanLayerError> {
        lock(&self.inner.approval_polls).push(external_call_id.to_string());
        lock(&self.inner.approval_statuses)
            .pop_front()
            .unwrap_or(Ok(ApprovalStatus::Pending))
    }

    async fn request_human_contact(&self, message: &str) -> Result<String, HumanLayerError> {
        if let Some(error) = lock(&self.inner.contact_request_error).clone() {
            return Err(error);
        }
        lock(&self.inner.contact_requests).push(RecordedContactRequest {
            config: self.config.clone(),
            message: message.to_string(),
        });
        Ok(lock(&self.inner.contact_call_id)
            .clone()
            .unwrap_or_else(|| "hl-contact".to_string()))
    }

    async fn get_human_contact_status(
        &self,
        external_call_id: &str,
    ) -> Result<ContactStatus, HumanLayerError> {
        lock(&self.inner.contact_polls).push(external_call_id.to_string());
        lock(&self.inner.contact_statuses)
            .pop_front()
            .unwrap_or(Ok(ContactStatus::Pending))
    }
}

// ---------------------------------------------------------------------------
// Record builders

/// A ToolCall in the `default` namespace with a parent-task label.
pub fn tool_call_named(
    name: &str,
    tool_ref: &str,
    tool_type: ToolType,
    arguments: &str,
) -> ToolCall {
    ToolCall {
        meta: ObjectMeta::new("default", name).with_label(LABEL_PARENT_TASK, "task-main"),
        spec: ToolCallSpec {
            tool_ref: ToolRef::new(tool_ref),
            tool_type,
            arguments: arguments.to_string(),
            tool_call_id: format!("call-{name}"),
            parent_task_label: "task-main".to_string(),
        },
        status: ToolCallStatus::default(),
    }
}

pub fn tool_server(namespace: &str, name: &str, approval_channel: Option<&str>) -> ToolServer {
    ToolServer {
        meta: ObjectMeta::new(namespace, name),
        spec: ToolServerSpec {
            endpoint: Some(format!("grpc://{name}.tools.svc:9000")),
            approval_contact_channel: approval_channel.map(str::to_string),
        },
    }
}

pub fn ready_slack_channel(namespace: &str, name: &str, secret_name: &str) -> ContactChannel {
    ContactChannel {
        meta: ObjectMeta::new(namespace, name),
        spec: ContactChannelSpec {
            channel_type: ChannelType::Slack,
            slack: Some(SlackConfig {
                channel_or_user_id: "C0123456".to_string(),
                context_about_channel_or_user: None,
            }),
            email: None,
            api_key_from: SecretKeyRef {
                name: secret_name.to_string(),
                key: "api-key".to_string(),
            },
            channel_api_key_from: None,
        },
        status: ContactChannelStatus {
            ready: true,
            status_detail: None,
        },
    }
}

pub fn secret_with(namespace: &str, name: &str, key: &str, value: &[u8]) -> Secret {
    let mut data = std::collections::BTreeMap::new();
    data.insert(key.to_string(), value.to_vec());
    Secret {
        meta: ObjectMeta::new(namespace, name),
        data,
    }
}
