use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use overseer_types::ContactChannelSpec;

pub mod http;

pub use http::HttpHumanLayerFactory;

/// Verdict of an approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected { comment: String },
}

/// Outcome of a human-contact request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactStatus {
    Pending,
    Replied { text: String },
}

/// The function-call the human is asked to approve.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallSpec {
    pub fn_name: String,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

/// Per-request client configuration: which channel to reach the human on,
/// the correlation ids, and the API key authorizing the request.
#[derive(Debug, Clone)]
pub struct HumanLayerConfig {
    pub channel: ContactChannelSpec,
    /// ToolCall name; the webhook path matches verdicts back on this.
    pub run_id: String,
    /// Caller-generated call id (≥48 bits of entropy).
    pub call_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Error)]
pub enum HumanLayerError {
    /// Network-level failure or a 5xx from the service. Retryable.
    #[error("human-layer transport error: {message}")]
    Transport { message: String },

    /// The service rejected the request itself (4xx). Permanent.
    #[error("human-layer request rejected ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("human-layer response malformed: {message}")]
    Malformed { message: String },
}

impl HumanLayerError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HumanLayerError::Transport { .. })
    }
}

/// A configured human-layer session. One client per outstanding request;
/// the external call id it returns is the polling handle.
#[async_trait]
pub trait HumanLayerClient: Send + Sync {
    async fn request_approval(
        &self,
        spec: &FunctionCallSpec,
    ) -> Result<String, HumanLayerError>;

    async fn get_approval_status(
        &self,
        external_call_id: &str,
    ) -> Result<ApprovalStatus, HumanLayerError>;

    async fn request_human_contact(&self, message: &str) -> Result<String, HumanLayerError>;

    async fn get_human_contact_status(
        &self,
        external_call_id: &str,
    ) -> Result<ContactStatus, HumanLayerError>;
}

/// Builds a client for one request's configuration. Injected so tests can
/// script verdicts without a network.
pub trait HumanLayerFactory: Send + Sync {
    fn client(&self, config: HumanLayerConfig) -> Arc<dyn HumanLayerClient>;
}
