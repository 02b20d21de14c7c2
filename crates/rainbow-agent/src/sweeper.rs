//! Workflow idle-timeout sweeper.
//!
//! Guests walk away mid-workflow all the time. Once a cursor has been idle
//! past the configured window the workflow is auto-cancelled with a short
//! "still there?" message so the next inbound message classifies fresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info};

use rainbow_conversations::MessageMeta;
use rainbow_workflows::WorkflowExecutor;

use crate::context::AgentContext;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Long-running sweep loop; one per process.
pub async fn run_workflow_timeout_sweeper(
    ctx: Arc<AgentContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("workflow timeout sweeper started");
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sweep_once(&ctx).await {
                    error!("workflow sweep error: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("workflow timeout sweeper shutting down");
                    break;
                }
            }
        }
    }
}

/// Cancel every workflow idle past the configured window. Returns how many
/// were cancelled.
pub async fn sweep_once(ctx: &Arc<AgentContext>) -> Result<usize, String> {
    let idle_minutes = ctx.config.assistant.workflow_idle_minutes;
    let cutoff = Utc::now() - chrono::Duration::minutes(idle_minutes);

    let active = ctx.store.active_workflows().map_err(|e| e.to_string())?;
    let mut cancelled = 0usize;

    for (phone, cursor, lang) in active {
        let idle = DateTime::parse_from_rfc3339(&cursor.updated_at)
            .map(|t| t.with_timezone(&Utc) < cutoff)
            .unwrap_or(true);
        if !idle {
            continue;
        }

        info!(
            phone = %phone,
            workflow = %cursor.workflow_id,
            idle_minutes,
            "auto-cancelling idle workflow"
        );

        ctx.store
            .set_workflow(&phone, None)
            .map_err(|e| e.to_string())?;

        let reply = WorkflowExecutor::timeout_reply(lang);
        let meta = MessageMeta {
            action: Some("workflow_timeout".to_string()),
            workflow_id: Some(cursor.workflow_id.clone()),
            step_id: Some(cursor.step_id.clone()),
            ..Default::default()
        };
        let _ = ctx.store.append_message(&phone, "assistant", &reply, meta);
        let _ = ctx.messenger.send(&phone, &reply).await;
        cancelled += 1;
    }
    Ok(cancelled)
}
