//! POST /preview/chat — the inbound chat surface.
//!
//! Serves both the WhatsApp adapter (which relays guest messages here) and
//! the dashboard's live simulator. Each call appends one turn; there is no
//! idempotency key by design.
//!
//! Request:  `{"phone": "...", "message": "...", "history": [...],
//!             "instanceId": "...", "pushName": "..."}`
//! Response: `{"reply", "intent", "confidence", "tier", "model",
//!             "detectedLanguage", "responseTimeMs", "kbFilesUsed",
//!             "action", "usage": {"prompt","completion","total"}}`

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use rainbow_channels::InboundMessage;
use rainbow_conversations::MessageMeta;
use rainbow_core::PhoneKey;

use crate::app::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub phone: String,
    pub message: String,
    /// Optional seed history for simulator sessions; only applied to a
    /// conversation that has no messages yet.
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryItem {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub reply: String,
    pub intent: String,
    pub confidence: f64,
    pub tier: Option<String>,
    pub model: Option<String>,
    pub detected_language: String,
    pub response_time_ms: u64,
    pub kb_files_used: Vec<String>,
    pub action: String,
    pub usage: UsageBody,
}

#[derive(Serialize)]
pub struct UsageBody {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

pub async fn preview_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, (StatusCode, Json<ApiError>)> {
    let phone = PhoneKey::parse(&req.phone).map_err(|e| bad_request(e.to_string()))?;
    if req.message.trim().is_empty() {
        return Err(bad_request("message cannot be empty".to_string()));
    }

    // Seed simulator history into an empty conversation so the classifier
    // and summarizer see the same context the caller does.
    if !req.history.is_empty() {
        let fresh = state
            .ctx
            .store
            .get(&phone)
            .ok()
            .flatten()
            .map(|c| c.message_count == 0)
            .unwrap_or(true);
        if fresh {
            let _ = state.ctx.store.get_or_create(&phone);
            for item in &req.history {
                let _ = state.ctx.store.append_message(
                    &phone,
                    &item.role,
                    &item.content,
                    MessageMeta::default(),
                );
            }
        }
    }

    let mut inbound = InboundMessage::new(phone, req.message);
    inbound.push_name = req.push_name;
    inbound.instance_id = req.instance_id;

    match state.pool.dispatch_and_wait(inbound).await {
        Ok(turn) => Ok(Json(PreviewResponse {
            reply: turn.reply,
            intent: turn.intent,
            confidence: turn.confidence,
            tier: turn.tier.map(|t| t.to_string()),
            model: turn.model,
            detected_language: turn.detected_language.to_string(),
            response_time_ms: turn.response_time_ms,
            kb_files_used: turn.kb_files_used,
            action: turn.action,
            usage: UsageBody {
                prompt: turn.usage.prompt_tokens,
                completion: turn.usage.completion_tokens,
                total: turn.usage.total(),
            },
        })),
        Err(e) => {
            warn!(error = %e, "preview chat turn failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

fn bad_request(error: String) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error }))
}
