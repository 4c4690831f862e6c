use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use overseer_types::{ChannelType, ContactChannelSpec, EmailConfig, SlackConfig};

use super::{
    ApprovalStatus, ContactStatus, FunctionCallSpec, HumanLayerClient, HumanLayerConfig,
    HumanLayerError, HumanLayerFactory,
};

const DEFAULT_API_BASE: &str = "https://api.humanlayer.dev/humanlayer/v1";

/// Builds HTTP clients against the human-layer service. One factory per
/// process; per-request state (channel, ids, API key) lives on the client.
pub struct HttpHumanLayerFactory {
    api_base: String,
    http: reqwest::Client,
}

impl HttpHumanLayerFactory {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHumanLayerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayerFactory for HttpHumanLayerFactory {
    fn client(&self, config: HumanLayerConfig) -> Arc<dyn HumanLayerClient> {
        Arc::new(HttpHumanLayerClient {
            api_base: self.api_base.clone(),
            http: self.http.clone(),
            config,
        })
    }
}

pub struct HttpHumanLayerClient {
    api_base: String,
    http: reqwest::Client,
    config: HumanLayerConfig,
}

#[derive(Debug, Serialize)]
struct ChannelPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    slack: Option<SlackChannelPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<EmailChannelPayload>,
}

#[derive(Debug, Serialize)]
struct SlackChannelPayload {
    channel_or_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_about_channel_or_user: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmailChannelPayload {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_about_user: Option<String>,
}

impl ChannelPayload {
    fn from_spec(spec: &ContactChannelSpec) -> Self {
        let slack = match (spec.channel_type, &spec.slack) {
            (ChannelType::Slack, Some(SlackConfig { channel_or_user_id, context_about_channel_or_user })) => {
                Some(SlackChannelPayload {
                    channel_or_user_id: channel_or_user_id.clone(),
                    context_about_channel_or_user: context_about_channel_or_user.clone(),
                })
            }
            _ => None,
        };
        let email = match (spec.channel_type, &spec.email) {
            (ChannelType::Email, Some(EmailConfig { address, context_about_user })) => {
                Some(EmailChannelPayload {
                    address: address.clone(),
                    context_about_user: context_about_user.clone(),
                })
            }
            _ => None,
        };
        Self { slack, email }
    }
}

#[derive(Debug, Serialize)]
struct FunctionCallRequest {
    run_id: String,
    call_id: String,
    spec: FunctionCallSpecPayload,
}

#[derive(Debug, Serialize)]
struct FunctionCallSpecPayload {
    #[serde(rename = "fn")]
    fn_name: String,
    kwargs: serde_json::Map<String, serde_json::Value>,
    channel: ChannelPayload,
}

#[derive(Debug, Deserialize)]
struct FunctionCallResponse {
    call_id: String,
    #[serde(default)]
    status: Option<FunctionCallStatusPayload>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallStatusPayload {
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContactRequest {
    run_id: String,
    call_id: String,
    spec: ContactSpecPayload,
}

#[derive(Debug, Serialize)]
struct ContactSpecPayload {
    msg: String,
    channel: ChannelPayload,
}

#[derive(Debug, Deserialize)]
struct ContactResponse {
    call_id: String,
    #[serde(default)]
    status: Option<ContactStatusPayload>,
}

#[derive(Debug, Deserialize)]
struct ContactStatusPayload {
    #[serde(default)]
    response: Option<String>,
}

impl HttpHumanLayerClient {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, HumanLayerError> {
        let response = self
            .http
            .post(self.url(path))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| HumanLayerError::transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn get<Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Resp, HumanLayerError> {
        let response = self
            .http
            .get(self.url(path))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .send()
            .await
            .map_err(|e| HumanLayerError::transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<Resp: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<Resp, HumanLayerError> {
        let status = response.status();
        if status.is_server_error() {
            return Err(HumanLayerError::transport(format!(
                "service returned {status}"
            )));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HumanLayerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<Resp>().await.map_err(|e| {
            HumanLayerError::Malformed {
                message: e.to_string(),
            }
        })
    }
}

#[async_trait]
impl HumanLayerClient for HttpHumanLayerClient {
    async fn request_approval(
        &self,
        spec: &FunctionCallSpec,
    ) -> Result<String, HumanLayerError> {
        let request = FunctionCallRequest {
            run_id: self.config.run_id.clone(),
            call_id: self.config.call_id.clone(),
            spec: FunctionCallSpecPayload {
                fn_name: spec.fn_name.clone(),
                kwargs: spec.kwargs.clone(),
                channel: ChannelPayload::from_spec(&self.config.channel),
            },
        };

        let response: FunctionCallResponse = self.post("function_calls", &request).await?;
        debug!(
            target: "humanlayer",
            run_id = %self.config.run_id,
            external_call_id = %response.call_id,
            "Approval requested"
        );
        Ok(response.call_id)
    }

    async fn get_approval_status(
        &self,
        external_call_id: &str,
    ) -> Result<ApprovalStatus, HumanLayerError> {
        let response: FunctionCallResponse = self
            .get(&format!("function_calls/{external_call_id}"))
            .await?;

        let Some(status) = response.status else {
            return Ok(ApprovalStatus::Pending);
        };
        Ok(match status.approved {
            None => ApprovalStatus::Pending,
            Some(true) => ApprovalStatus::Approved,
            Some(false) => ApprovalStatus::Rejected {
                comment: status.comment.unwrap_or_default(),
            },
        })
    }

    async fn request_human_contact(&self, message: &str) -> Result<String, HumanLayerError> {
        let request = ContactRequest {
            run_id: self.config.run_id.clone(),
            call_id: self.config.call_id.clone(),
            spec: ContactSpecPayload {
                msg: message.to_string(),
                channel: ChannelPayload::from_spec(&self.config.channel),
            },
        };

        let response: ContactResponse = self.post("contact_requests", &request).await?;
        debug!(
            target: "humanlayer",
            run_id = %self.config.run_id,
            external_call_id = %response.call_id,
            "Human contact requested"
        );
        Ok(response.call_id)
    }

    async fn get_human_contact_status(
        &self,
        external_call_id: &str,
    ) -> Result<ContactStatus, HumanLayerError> {
        let response: ContactResponse = self
            .get(&format!("contact_requests/{external_call_id}"))
            .await?;

        Ok(match response.status.and_then(|s| s.response) {
            Some(text) => ContactStatus::Replied { text },
            None => ContactStatus::Pending,
        })
    }
}

/// Generates the caller-side call id submitted with each request. Twelve
/// alphanumeric chars carry ~71 bits of entropy, comfortably past the
/// 48-bit floor the service requires for dedup.
pub fn generate_call_id() -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const LEN: usize = 12;
    let mut rng = rand::thread_rng();

    (0..LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
