use sha2::{Digest, Sha256};

use crate::meta::MAX_NAME_BYTES;
use crate::toolcall::{ToolCallSpec, ToolType};

/// Prefix kept when a derived name exceeds [`MAX_NAME_BYTES`]. The
/// remaining 8 bytes hold `-` plus a 7-char hash of the full name.
const TRUNCATED_PREFIX_BYTES: usize = 55;
const HASH_SUFFIX_CHARS: usize = 7;

/// Tool reference prefix that routes a call to sub-agent delegation.
pub const DELEGATE_TOOL_PREFIX: &str = "delegate_to_agent";

/// The parsed routing decision for one tool call, derived from
/// `tool_ref.name` and `tool_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    /// Execute `<tool>` on the remote tool server `<server>`.
    Remote { server: String, tool: String },
    /// Create a child Task for `<agent>` and await its answer.
    Delegate { agent: String },
    /// Ask a human a question over `<channel>` and await the reply.
    HumanContact { channel: String },
    /// Nothing we know how to run.
    Unknown { tool_ref: String },
}

impl ToolInvocation {
    /// Splits `tool_ref.name` on the first `"__"` according to the declared
    /// tool type. Malformed references parse to `Unknown` rather than
    /// erroring; the state machine fails them permanently.
    pub fn parse(spec: &ToolCallSpec) -> Self {
        let name = spec.tool_ref.name.as_str();
        match spec.tool_type {
            ToolType::Remote => match split_once_double_underscore(name) {
                Some((server, tool)) if !server.is_empty() && !tool.is_empty() => {
                    ToolInvocation::Remote {
                        server: server.to_string(),
                        tool: tool.to_string(),
                    }
                }
                _ => ToolInvocation::Unknown {
                    tool_ref: name.to_string(),
                },
            },
            ToolType::Delegate => match split_once_double_underscore(name) {
                Some((DELEGATE_TOOL_PREFIX, agent)) if !agent.is_empty() => {
                    ToolInvocation::Delegate {
                        agent: agent.to_string(),
                    }
                }
                _ => ToolInvocation::Unknown {
                    tool_ref: name.to_string(),
                },
            },
            ToolType::HumanContact => match split_once_double_underscore(name) {
                Some((channel, _)) if !channel.is_empty() => ToolInvocation::HumanContact {
                    channel: channel.to_string(),
                },
                _ => ToolInvocation::Unknown {
                    tool_ref: name.to_string(),
                },
            },
            ToolType::Unspecified => ToolInvocation::Unknown {
                tool_ref: name.to_string(),
            },
        }
    }
}

fn split_once_double_underscore(name: &str) -> Option<(&str, &str)> {
    name.split_once("__")
}

/// Derives the child Task name for a delegation:
/// `delegate-<tool_call_name>-<agent>`, truncated deterministically so the
/// same ToolCall always derives the same child name.
pub fn delegate_task_name(tool_call_name: &str, agent: &str) -> String {
    truncate_name(&format!("delegate-{tool_call_name}-{agent}"))
}

/// Truncates a record name to [`MAX_NAME_BYTES`] while preserving
/// uniqueness: names over the limit keep a 55-byte prefix and append `-`
/// plus the first 7 hex chars of the SHA-256 of the full name.
pub fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }

    let digest = Sha256::digest(name.as_bytes());
    let suffix: String = hex::encode(digest)
        .chars()
        .take(HASH_SUFFIX_CHARS)
        .collect();

    let mut cut = TRUNCATED_PREFIX_BYTES;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}-{}", &name[..cut], suffix)
}
