use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ToolCallerError {
    /// The call never reached the tool, or the transport failed mid-flight.
    /// Retried with backoff; remote calls are idempotent by convention.
    #[error("transport error calling {server}/{tool}: {message}")]
    Transport {
        server: String,
        tool: String,
        message: String,
    },

    /// The tool ran and reported a failure. Permanent for this attempt.
    #[error("tool {tool} on {server} failed: {message}")]
    Execution {
        server: String,
        tool: String,
        message: String,
    },
}

impl ToolCallerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolCallerError::Transport { .. })
    }
}

/// The only path to remote tool execution. Connection management lives
/// behind this trait; the controller just calls.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolCallerError>;
}

/// Placeholder caller for deployments without a connection manager wired
/// in. Every call fails permanently.
pub struct UnconfiguredToolCaller;

#[async_trait]
impl ToolCaller for UnconfiguredToolCaller {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        _args: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, ToolCallerError> {
        Err(ToolCallerError::Execution {
            server: server.to_string(),
            tool: tool.to_string(),
            message: "no tool-server caller configured".to_string(),
        })
    }
}
