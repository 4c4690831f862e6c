use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// An out-of-process tool server. Connection management is owned by the
/// tool-server caller; the controller only reads the approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServer {
    pub meta: ObjectMeta,
    pub spec: ToolServerSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerSpec {
    /// Opaque connection reference consumed by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// When set, every tool on this server requires human approval through
    /// the named ContactChannel before it runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_contact_channel: Option<String>,
}

impl ToolServer {
    pub fn approval_channel(&self) -> Option<&str> {
        self.spec
            .approval_contact_channel
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}
