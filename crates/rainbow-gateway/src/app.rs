use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use rainbow_agent::{AgentContext, WorkerPool};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub ctx: Arc<AgentContext>,
    pub pool: Arc<WorkerPool>,
}

impl AppState {
    pub fn new(ctx: Arc<AgentContext>) -> Arc<Self> {
        let pool = WorkerPool::new(ctx.clone());
        Arc::new(Self { ctx, pool })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/preview/chat", post(crate::http::preview::preview_chat))
        .route(
            "/intent/accuracy",
            get(crate::http::accuracy::accuracy_handler),
        )
        .route(
            "/intent/feedback",
            post(crate::http::accuracy::feedback_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
