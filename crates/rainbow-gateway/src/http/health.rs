use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use rainbow_providers::breaker::BreakerSnapshot;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub kb_healthy: bool,
    pub active_workers: usize,
    pub breakers: Vec<BreakerSnapshot>,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        kb_healthy: state.ctx.knowledge.healthy(),
        active_workers: state.pool.active_workers(),
        breakers: state.ctx.providers.breaker().snapshot(),
    })
}
