use std::sync::Arc;
use thiserror::Error;

use overseer_types::{ContactChannel, Key, SecretKeyRef};

use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("contact channel {key} not found")]
    ChannelNotFound { key: String },

    #[error("contact channel {key} is not ready{detail}")]
    ChannelNotReady { key: String, detail: String },

    #[error("secret {key} not found")]
    SecretNotFound { key: String },

    #[error("secret {secret} has no key {key}")]
    KeyMissing { secret: String, key: String },

    #[error("secret {secret} key {key} is not valid UTF-8")]
    KeyNotUtf8 { secret: String, key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ContactError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ContactError::Store(e) if e.is_transient())
    }
}

/// Fetches a ContactChannel and requires it to be validated.
pub async fn resolve_channel(
    store: &Arc<dyn ObjectStore>,
    namespace: &str,
    name: &str,
) -> Result<ContactChannel, ContactError> {
    let key = Key::new(namespace, name);
    let channel = store
        .get_contact_channel(&key)
        .await?
        .ok_or_else(|| ContactError::ChannelNotFound {
            key: key.to_string(),
        })?;

    if !channel.status.ready {
        let detail = channel
            .status
            .status_detail
            .as_ref()
            .map(|d| format!(": {d}"))
            .unwrap_or_default();
        return Err(ContactError::ChannelNotReady {
            key: key.to_string(),
            detail,
        });
    }

    Ok(channel)
}

/// Resolves the human-layer API key for a channel. The channel-scoped
/// override wins over the channel's default source.
pub async fn resolve_api_key(
    store: &Arc<dyn ObjectStore>,
    namespace: &str,
    channel: &ContactChannel,
) -> Result<String, ContactError> {
    let source: &SecretKeyRef = channel
        .spec
        .channel_api_key_from
        .as_ref()
        .unwrap_or(&channel.spec.api_key_from);

    let key = Key::new(namespace, source.name.clone());
    let secret = store
        .get_secret(&key)
        .await?
        .ok_or_else(|| ContactError::SecretNotFound {
            key: key.to_string(),
        })?;

    let value = secret
        .value(&source.key)
        .ok_or_else(|| ContactError::KeyMissing {
            secret: source.name.clone(),
            key: source.key.clone(),
        })?;

    String::from_utf8(value.to_vec()).map_err(|_| ContactError::KeyNotUtf8 {
        secret: source.name.clone(),
        key: source.key.clone(),
    })
}
