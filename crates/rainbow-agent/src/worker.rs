//! Per-phone worker pool.
//!
//! One mailbox per phone key: messages for the same guest process strictly
//! in arrival order, different guests process in parallel. There is no
//! process-wide lock anywhere in the turn path — the mailbox IS the
//! serialization.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use rainbow_channels::InboundMessage;
use rainbow_core::RainbowError;

use crate::context::AgentContext;
use crate::pipeline::{process_inbound, TurnReply};

/// Worker mailbox depth. A guest with 32 unprocessed messages is being
/// rate-limited upstream anyway.
const MAILBOX_CAPACITY: usize = 32;
/// Idle workers park this long before exiting; a new message respawns them.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct Job {
    msg: InboundMessage,
    /// Present for request/response callers (HTTP preview); channel-driven
    /// inbound traffic is fire-and-forget.
    reply_tx: Option<oneshot::Sender<Result<TurnReply, RainbowError>>>,
}

pub struct WorkerPool {
    ctx: Arc<AgentContext>,
    workers: DashMap<String, mpsc::Sender<Job>>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<AgentContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            workers: DashMap::new(),
        })
    }

    /// Enqueue a message and forget it (WhatsApp inbound path).
    pub async fn dispatch(self: &Arc<Self>, msg: InboundMessage) {
        self.enqueue(Job {
            msg,
            reply_tx: None,
        })
        .await;
    }

    /// Enqueue a message and wait for its turn result (preview path).
    pub async fn dispatch_and_wait(
        self: &Arc<Self>,
        msg: InboundMessage,
    ) -> Result<TurnReply, RainbowError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job {
            msg,
            reply_tx: Some(tx),
        })
        .await;
        rx.await
            .map_err(|_| RainbowError::Internal("worker dropped the reply".to_string()))?
    }

    async fn enqueue(self: &Arc<Self>, mut job: Job) {
        let key = job.msg.phone.to_string();
        loop {
            let sender = match self.workers.get(&key) {
                Some(tx) => tx.clone(),
                None => self.spawn_worker(&key),
            };
            match sender.send(job).await {
                Ok(()) => return,
                // The worker reaped itself between lookup and send; retry
                // against a fresh one. remove_if guards a replacement
                // spawned by a concurrent enqueue.
                Err(mpsc::error::SendError(returned)) => {
                    self.workers
                        .remove_if(&key, |_, tx| tx.same_channel(&sender));
                    job = returned;
                }
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, key: &str) -> mpsc::Sender<Job> {
        let (tx, mut rx) = mpsc::channel::<Job>(MAILBOX_CAPACITY);
        self.workers.insert(key.to_string(), tx.clone());

        let ctx = Arc::clone(&self.ctx);
        let pool = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            debug!(phone = %key, "worker started");
            loop {
                match tokio::time::timeout(IDLE_TIMEOUT, rx.recv()).await {
                    Ok(Some(job)) => {
                        let result = process_inbound(&ctx, &job.msg).await;
                        if let Err(e) = &result {
                            warn!(phone = %key, error = %e, "turn failed");
                        }
                        if let Some(reply_tx) = job.reply_tx {
                            let _ = reply_tx.send(result);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        // Deregister first so no new sends land in this
                        // mailbox, then drain stragglers before exiting.
                        pool.workers.remove(&key);
                        while let Ok(job) = rx.try_recv() {
                            let result = process_inbound(&ctx, &job.msg).await;
                            if let Some(reply_tx) = job.reply_tx {
                                let _ = reply_tx.send(result);
                            }
                        }
                        debug!(phone = %key, "idle worker reaped");
                        break;
                    }
                }
            }
        });
        tx
    }

    /// Number of live workers (diagnostics).
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }
}
