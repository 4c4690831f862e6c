use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use overseer_types::{ContactChannel, Key, ToolCall, ToolInvocation};

use crate::contact::{self, ContactError};
use crate::executor::{ExecuteError, parse_arguments};
use crate::humanlayer::{
    ApprovalStatus, ContactStatus, FunctionCallSpec, HumanLayerConfig, HumanLayerError,
    HumanLayerFactory, http,
};
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("tool server {key} not found")]
    ServerNotFound { key: String },

    #[error("tool call is not awaiting a human-contact reply")]
    NotHumanContact,

    #[error(transparent)]
    Contact(#[from] ContactError),

    #[error(transparent)]
    HumanLayer(#[from] HumanLayerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Arguments(#[from] ExecuteError),
}

impl ApprovalError {
    pub fn is_transient(&self) -> bool {
        match self {
            ApprovalError::HumanLayer(e) => e.is_transient(),
            ApprovalError::Store(e) => e.is_transient(),
            ApprovalError::Contact(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Decides whether a ToolCall needs human approval, requests the verdict,
/// and polls for it. Returns values only; the reconciler writes status.
#[derive(Clone)]
pub struct ApprovalCoordinator {
    store: Arc<dyn ObjectStore>,
    humanlayer: Arc<dyn HumanLayerFactory>,
}

impl ApprovalCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, humanlayer: Arc<dyn HumanLayerFactory>) -> Self {
        Self { store, humanlayer }
    }

    /// `Some(channel)` iff the call is remote and its ToolServer names an
    /// approval channel. The channel must be ready.
    pub async fn needs_approval(
        &self,
        tool_call: &ToolCall,
    ) -> Result<Option<ContactChannel>, ApprovalError> {
        let ToolInvocation::Remote { server, .. } = ToolInvocation::parse(&tool_call.spec) else {
            return Ok(None);
        };

        let key = Key::new(tool_call.meta.namespace.clone(), server);
        let tool_server = self
            .store
            .get_tool_server(&key)
            .await?
            .ok_or_else(|| ApprovalError::ServerNotFound {
                key: key.to_string(),
            })?;

        let Some(channel_name) = tool_server.approval_channel() else {
            return Ok(None);
        };

        let channel =
            contact::resolve_channel(&self.store, &tool_call.meta.namespace, channel_name).await?;
        Ok(Some(channel))
    }

    /// Submits the approval request and returns the service-issued external
    /// call id.
    pub async fn request_approval(
        &self,
        tool_call: &ToolCall,
        channel: &ContactChannel,
    ) -> Result<String, ApprovalError> {
        let kwargs = parse_arguments(&tool_call.spec.arguments)?;
        let client = self.client_for(tool_call, channel).await?;

        let external_call_id = client
            .request_approval(&FunctionCallSpec {
                fn_name: tool_call.spec.tool_ref.name.clone(),
                kwargs,
            })
            .await?;

        debug!(
            target: "approval",
            tool_call = %tool_call.meta.key(),
            %external_call_id,
            "Approval requested"
        );
        Ok(external_call_id)
    }

    pub async fn poll_approval(
        &self,
        tool_call: &ToolCall,
        channel: &ContactChannel,
        external_call_id: &str,
    ) -> Result<ApprovalStatus, ApprovalError> {
        let client = self.client_for(tool_call, channel).await?;
        Ok(client.get_approval_status(external_call_id).await?)
    }

    /// Polls the human-contact reply for a call in `AwaitingHumanInput`.
    /// The channel is re-resolved from the tool reference each time.
    pub async fn poll_contact(
        &self,
        tool_call: &ToolCall,
        external_call_id: &str,
    ) -> Result<ContactStatus, ApprovalError> {
        let ToolInvocation::HumanContact { channel } = ToolInvocation::parse(&tool_call.spec)
        else {
            return Err(ApprovalError::NotHumanContact);
        };

        let channel =
            contact::resolve_channel(&self.store, &tool_call.meta.namespace, &channel).await?;
        let client = self.client_for(tool_call, &channel).await?;
        Ok(client.get_human_contact_status(external_call_id).await?)
    }

    async fn client_for(
        &self,
        tool_call: &ToolCall,
        channel: &ContactChannel,
    ) -> Result<Arc<dyn crate::humanlayer::HumanLayerClient>, ApprovalError> {
        let api_key =
            contact::resolve_api_key(&self.store, &tool_call.meta.namespace, channel).await?;

        Ok(self.humanlayer.client(HumanLayerConfig {
            channel: channel.spec.clone(),
            run_id: tool_call.meta.name.clone(),
            call_id: http::generate_call_id(),
            api_key,
        }))
    }
}
