//! GET /intent/accuracy and POST /intent/feedback — classifier analytics.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use rainbow_conversations::{AccuracyBucket, AccuracyRow};
use rainbow_core::PhoneKey;

use crate::app::AppState;
use crate::http::preview::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyResponse {
    pub overall: BucketBody,
    pub by_intent: Vec<RowBody>,
    pub by_tier: Vec<RowBody>,
    pub by_model: Vec<RowBody>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketBody {
    pub total: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub unvalidated: u64,
    /// Null when nothing is validated — the dashboard renders "-".
    pub accuracy_rate: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowBody {
    pub key: String,
    #[serde(flatten)]
    pub bucket: BucketBody,
}

impl From<AccuracyBucket> for BucketBody {
    fn from(b: AccuracyBucket) -> Self {
        Self {
            total: b.total,
            correct: b.correct,
            incorrect: b.incorrect,
            unvalidated: b.unvalidated,
            accuracy_rate: b.accuracy_rate,
        }
    }
}

fn rows(rows: Vec<AccuracyRow>) -> Vec<RowBody> {
    rows.into_iter()
        .map(|r| RowBody {
            key: r.key,
            bucket: r.bucket.into(),
        })
        .collect()
}

pub async fn accuracy_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AccuracyResponse>, (StatusCode, Json<ApiError>)> {
    let report = state.ctx.store.accuracy_report().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })?;

    Ok(Json(AccuracyResponse {
        overall: report.overall.into(),
        by_intent: rows(report.by_intent),
        by_tier: rows(report.by_tier),
        by_model: rows(report.by_model),
    }))
}

/// Thumbs feedback from staff. Up marks the latest prediction for the
/// conversation correct; down marks it incorrect with an optional corrected
/// intent (defaulting to "unknown").
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub phone: String,
    pub correct: bool,
    #[serde(default)]
    pub actual_intent: Option<String>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub ok: bool,
}

pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, (StatusCode, Json<ApiError>)> {
    let phone = PhoneKey::parse(&req.phone).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: e.to_string(),
            }),
        )
    })?;

    let result = if req.correct {
        state.ctx.store.mark_latest_correct(&phone)
    } else {
        state
            .ctx
            .store
            .mark_latest_incorrect(&phone, req.actual_intent.as_deref())
    };

    match result {
        Ok(()) => Ok(Json(FeedbackResponse { ok: true })),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: e.to_string(),
            }),
        )),
    }
}
