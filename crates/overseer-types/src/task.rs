use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::meta::ObjectMeta;
use crate::span::SpanContext;

/// A unit of agent work. The controller consumes Tasks it delegated to
/// sub-agents; it never owns their lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub meta: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Name of the agent that should run this task.
    pub agent_ref: String,
    /// The message handed to the agent.
    pub user_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum TaskPhase {
    Pending,
    Running,
    FinalAnswer,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TaskPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_context: Option<SpanContext>,
}

impl Task {
    pub fn is_complete(&self) -> bool {
        matches!(
            self.status.phase,
            Some(TaskPhase::FinalAnswer) | Some(TaskPhase::Failed)
        )
    }
}
