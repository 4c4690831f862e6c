use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::meta::ObjectMeta;
use crate::span::SpanContext;

/// One attempt of one tool invocation, driven by the controller from
/// creation to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub meta: ObjectMeta,
    pub spec: ToolCallSpec,
    #[serde(default)]
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
}

impl ToolRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Execution strategy declared on the spec. `Unspecified` is kept for wire
/// compatibility with records written before the field existed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
pub enum ToolType {
    #[serde(rename = "remote")]
    #[strum(serialize = "remote")]
    Remote,
    #[serde(rename = "delegate")]
    #[strum(serialize = "delegate")]
    Delegate,
    #[serde(rename = "humanContact")]
    #[strum(serialize = "humanContact")]
    HumanContact,
    #[serde(rename = "unspecified")]
    #[strum(serialize = "unspecified")]
    #[default]
    Unspecified,
}

/// Immutable after create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSpec {
    pub tool_ref: ToolRef,
    #[serde(default)]
    pub tool_type: ToolType,
    /// JSON object serialized as a string.
    pub arguments: String,
    /// Stable external correlation id chosen by the caller.
    #[serde(rename = "toolCallID")]
    pub tool_call_id: String,
    /// Name of the parent Task record.
    pub parent_task_label: String,
}

/// Wire phase. The `(phase, status)` pair only advances along the edges of
/// the lifecycle graph; any other combination is treated as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Phase {
    Pending,
    AwaitingHumanApproval,
    ReadyToExecuteApprovedTool,
    AwaitingSubAgent,
    AwaitingHumanInput,
    Succeeded,
    ToolCallRejected,
    Failed,
    ErrorRequestingHumanApproval,
    ErrorRequestingHumanInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum StatusCode {
    Pending,
    Ready,
    Succeeded,
    Error,
}

/// Mutable state-machine surface. Only the reconciler writes this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Final output, or the rejection explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Opaque handle issued by the human-layer service.
    #[serde(default, rename = "externalCallID", skip_serializing_if = "Option::is_none")]
    pub external_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_context: Option<SpanContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl ToolCallStatus {
    /// Terminal states are sticky: once `status` is `Succeeded` or `Error`
    /// no further field changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            Some(StatusCode::Succeeded) | Some(StatusCode::Error)
        )
    }
}

/// The `(phase, status)` product collapsed to one variant per reachable
/// pair, so impossible combinations cannot be represented past parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Fresh record, nothing written yet.
    Uninitialized,
    /// `(Pending, Pending)`: initialized, not yet set up.
    Pending,
    /// `(Pending, Ready)`: ready to route.
    Ready,
    /// `(AwaitingHumanApproval, Ready)`: approval requested, polling.
    AwaitingApproval,
    /// `(ReadyToExecuteApprovedTool, Ready)`: approved, execute next.
    ApprovedReady,
    /// `(AwaitingSubAgent, Ready)`: child task created, polling.
    AwaitingSubAgent,
    /// `(AwaitingHumanInput, Ready)`: contact requested, polling.
    AwaitingHumanReply,
    /// `(Succeeded, Succeeded)`.
    Succeeded,
    /// `(ToolCallRejected, Succeeded)`: the human said no.
    Rejected,
    /// `(Failed, Error)`.
    Failed,
    /// `(ErrorRequestingHumanApproval, Error)`.
    ApprovalRequestFailed,
    /// `(ErrorRequestingHumanInput, Error)`.
    ContactRequestFailed,
}

impl Lifecycle {
    /// Classifies a status into the lifecycle graph. `None` means the pair
    /// is off the graph and must be treated as failed.
    pub fn of(status: &ToolCallStatus) -> Option<Self> {
        match (status.phase, status.status) {
            (None, None) => Some(Lifecycle::Uninitialized),
            (Some(Phase::Pending), Some(StatusCode::Pending)) => Some(Lifecycle::Pending),
            (Some(Phase::Pending), Some(StatusCode::Ready)) => Some(Lifecycle::Ready),
            (Some(Phase::AwaitingHumanApproval), Some(StatusCode::Ready)) => {
                Some(Lifecycle::AwaitingApproval)
            }
            (Some(Phase::ReadyToExecuteApprovedTool), Some(StatusCode::Ready)) => {
                Some(Lifecycle::ApprovedReady)
            }
            (Some(Phase::AwaitingSubAgent), Some(StatusCode::Ready)) => {
                Some(Lifecycle::AwaitingSubAgent)
            }
            (Some(Phase::AwaitingHumanInput), Some(StatusCode::Ready)) => {
                Some(Lifecycle::AwaitingHumanReply)
            }
            (Some(Phase::Succeeded), Some(StatusCode::Succeeded)) => Some(Lifecycle::Succeeded),
            (Some(Phase::ToolCallRejected), Some(StatusCode::Succeeded)) => {
                Some(Lifecycle::Rejected)
            }
            (Some(Phase::Failed), Some(StatusCode::Error)) => Some(Lifecycle::Failed),
            (Some(Phase::ErrorRequestingHumanApproval), Some(StatusCode::Error)) => {
                Some(Lifecycle::ApprovalRequestFailed)
            }
            (Some(Phase::ErrorRequestingHumanInput), Some(StatusCode::Error)) => {
                Some(Lifecycle::ContactRequestFailed)
            }
            _ => None,
        }
    }

    /// Projection back to the wire pair.
    pub fn project(self) -> (Option<Phase>, Option<StatusCode>) {
        match self {
            Lifecycle::Uninitialized => (None, None),
            Lifecycle::Pending => (Some(Phase::Pending), Some(StatusCode::Pending)),
            Lifecycle::Ready => (Some(Phase::Pending), Some(StatusCode::Ready)),
            Lifecycle::AwaitingApproval => {
                (Some(Phase::AwaitingHumanApproval), Some(StatusCode::Ready))
            }
            Lifecycle::ApprovedReady => (
                Some(Phase::ReadyToExecuteApprovedTool),
                Some(StatusCode::Ready),
            ),
            Lifecycle::AwaitingSubAgent => (Some(Phase::AwaitingSubAgent), Some(StatusCode::Ready)),
            Lifecycle::AwaitingHumanReply => {
                (Some(Phase::AwaitingHumanInput), Some(StatusCode::Ready))
            }
            Lifecycle::Succeeded => (Some(Phase::Succeeded), Some(StatusCode::Succeeded)),
            Lifecycle::Rejected => (Some(Phase::ToolCallRejected), Some(StatusCode::Succeeded)),
            Lifecycle::Failed => (Some(Phase::Failed), Some(StatusCode::Error)),
            Lifecycle::ApprovalRequestFailed => (
                Some(Phase::ErrorRequestingHumanApproval),
                Some(StatusCode::Error),
            ),
            Lifecycle::ContactRequestFailed => (
                Some(Phase::ErrorRequestingHumanInput),
                Some(StatusCode::Error),
            ),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Lifecycle::Succeeded
                | Lifecycle::Rejected
                | Lifecycle::Failed
                | Lifecycle::ApprovalRequestFailed
                | Lifecycle::ContactRequestFailed
        )
    }
}
