use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use overseer_types::{LabelSelector, Lifecycle, ToolCall};

use crate::machine::{approved_status, rejected_status};
use crate::reconciler::ControllerHandle;
use crate::store::ObjectStore;

/// Out-of-band verdict delivery. The human-layer service posts the same
/// approved/rejected outcome the poll path would have observed; the
/// transition applied is identical to the poll path's.
#[derive(Clone)]
pub struct WebhookState {
    pub store: Arc<dyn ObjectStore>,
    /// When present, approved calls are enqueued for immediate execution
    /// instead of waiting for the next poll tick.
    pub controller: Option<ControllerHandle>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/inbound", post(inbound))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct InboundVerdict {
    #[serde(rename = "runID")]
    run_id: String,
    status: VerdictStatus,
}

#[derive(Debug, Deserialize)]
struct VerdictStatus {
    approved: bool,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct InboundReply {
    message: String,
}

fn reply(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(InboundReply {
            message: message.into(),
        }),
    )
        .into_response()
}

async fn inbound(
    State(state): State<WebhookState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Ok(verdict) = serde_json::from_value::<InboundVerdict>(body) else {
        return reply(StatusCode::BAD_REQUEST, "malformed verdict payload");
    };

    let tool_call = match find_by_run_id(&state, &verdict.run_id).await {
        Ok(Some(tool_call)) => tool_call,
        Ok(None) => {
            return reply(
                StatusCode::NOT_FOUND,
                format!("no tool call matches run id {:?}", verdict.run_id),
            );
        }
        Err(error) => {
            warn!(%error, run_id = %verdict.run_id, "Store failure resolving webhook verdict");
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "store failure");
        }
    };

    match Lifecycle::of(&tool_call.status) {
        Some(Lifecycle::AwaitingApproval) => {}
        Some(lifecycle) if lifecycle.is_terminal() => {
            // Redelivery of a verdict that already landed.
            return reply(StatusCode::OK, "tool call already resolved");
        }
        _ => {
            return reply(
                StatusCode::BAD_REQUEST,
                "tool call is not awaiting human approval",
            );
        }
    }

    let next = if verdict.status.approved {
        approved_status(&tool_call)
    } else {
        rejected_status(&tool_call, verdict.status.comment.as_deref().unwrap_or(""))
    };

    let key = tool_call.meta.key();
    let mut updated = tool_call;
    updated.status = next;
    if let Err(error) = state.store.update_tool_call_status(updated).await {
        warn!(%error, tool_call = %key, "Failed applying webhook verdict");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, "store failure");
    }

    info!(
        tool_call = %key,
        approved = verdict.status.approved,
        "Applied webhook verdict"
    );

    if verdict.status.approved {
        if let Some(controller) = &state.controller {
            let _ = controller.try_enqueue(key);
        }
    }

    reply(StatusCode::OK, "verdict applied")
}

async fn find_by_run_id(
    state: &WebhookState,
    run_id: &str,
) -> Result<Option<ToolCall>, crate::store::StoreError> {
    let all = state
        .store
        .list_tool_calls(None, &LabelSelector::everything())
        .await?;
    Ok(all.into_iter().find(|tc| tc.meta.name == run_id))
}
