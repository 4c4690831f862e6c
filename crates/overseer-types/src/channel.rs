use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::meta::ObjectMeta;

/// A configured route to a human: a Slack conversation or an email address,
/// plus the secret holding the human-layer API key for that route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactChannel {
    pub meta: ObjectMeta,
    pub spec: ContactChannelSpec,
    #[serde(default)]
    pub status: ContactChannelStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ChannelType {
    #[serde(rename = "slack")]
    #[strum(serialize = "slack")]
    Slack,
    #[serde(rename = "email")]
    #[strum(serialize = "email")]
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactChannelSpec {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
    /// Default API-key source for this channel.
    pub api_key_from: SecretKeyRef,
    /// Channel-scoped override; takes precedence when present.
    #[serde(default, rename = "channelAPIKeyFrom", skip_serializing_if = "Option::is_none")]
    pub channel_api_key_from: Option<SecretKeyRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(rename = "channelOrUserID")]
    pub channel_or_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_about_channel_or_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_about_user: Option<String>,
}

/// `(secret name, data key)` pair locating an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// A channel is usable only once it has been validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactChannelStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
}
