// Record types shared by the Overseer control plane crates.

pub mod channel;
pub mod invocation;
pub mod meta;
pub mod secret;
pub mod server;
pub mod span;
pub mod task;
pub mod toolcall;

pub use channel::{ChannelType, ContactChannel, ContactChannelSpec, ContactChannelStatus, EmailConfig, SecretKeyRef, SlackConfig};
pub use invocation::{ToolInvocation, delegate_task_name, truncate_name};
pub use meta::{Key, LabelSelector, MAX_NAME_BYTES, ObjectMeta};
pub use secret::Secret;
pub use server::{ToolServer, ToolServerSpec};
pub use span::SpanContext;
pub use task::{Task, TaskPhase, TaskSpec, TaskStatus};
pub use toolcall::{
    Lifecycle, Phase, StatusCode, ToolCall, ToolCallSpec, ToolCallStatus, ToolRef, ToolType,
};

/// Label on a ToolCall naming its parent Task.
pub const LABEL_PARENT_TASK: &str = "parent-task";

/// Label on a Task naming the ToolCall that delegated it.
pub const LABEL_PARENT_TOOL_CALL: &str = "parent-toolcall";
