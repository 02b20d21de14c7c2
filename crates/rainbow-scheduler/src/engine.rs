use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use rainbow_channels::OutboundMessenger;
use rainbow_core::{config::SCHEDULER_TICK_SECS, AdminAlert, PhoneKey};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{next_occurrence, RepeatRule, ScheduledTask, TaskStatus},
};

/// Dispatch attempts before a task is marked failed and admin is alerted.
const MAX_ATTEMPTS: u32 = 5;

/// Shared handle for task management (schedule/cancel/list) while the
/// engine loop runs. Uses the same connection, serialized by the mutex.
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn shared_conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Queue a message for a future instant. `fire_at` must be in the
    /// future — pending rows never point at the past on creation.
    pub fn schedule(
        &self,
        phone: &PhoneKey,
        payload: &str,
        fire_at: DateTime<Utc>,
        repeat: RepeatRule,
        creator: &str,
    ) -> Result<ScheduledTask> {
        let now = Utc::now();
        if fire_at <= now {
            return Err(SchedulerError::InvalidFireAt {
                reason: format!("fire_at {} is not in the future", fire_at.to_rfc3339()),
            });
        }

        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            phone: phone.to_string(),
            payload: payload.to_string(),
            fire_at: fire_at.to_rfc3339(),
            repeat,
            creator: creator.to_string(),
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        let conn = self.conn.lock().unwrap();
        insert_task(&conn, &task)?;
        info!(task_id = %task.id, phone = %task.phone, fire_at = %task.fire_at, "task scheduled");
        Ok(task)
    }

    /// Cancel a pending task. Sent/failed tasks are immutable history.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE scheduled_tasks SET status = 'cancelled', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            rusqlite::params![Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(SchedulerError::TaskNotFound { id: id.to_string() });
        }
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    /// All tasks ordered by fire time.
    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, phone, payload, fire_at, repeat_rule, creator, status,
                    attempts, last_error, created_at, updated_at
             FROM scheduled_tasks ORDER BY fire_at, created_at",
        )?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Pending tasks for one conversation (for the workflow follow-up
    /// effect and the dashboard).
    pub fn pending_for(&self, phone: &PhoneKey) -> Result<Vec<ScheduledTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, phone, payload, fire_at, repeat_rule, creator, status,
                    attempts, last_error, created_at, updated_at
             FROM scheduled_tasks
             WHERE phone = ?1 AND status = 'pending'
             ORDER BY fire_at, created_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![phone.as_str()], row_to_task)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// Sweeps due tasks and dispatches them through the outbound channel.
pub struct SchedulerEngine {
    conn: Arc<Mutex<Connection>>,
    messenger: Arc<dyn OutboundMessenger>,
    alert_tx: Option<mpsc::Sender<AdminAlert>>,
    retry_base: Duration,
}

impl SchedulerEngine {
    pub fn new(
        handle: &SchedulerHandle,
        messenger: Arc<dyn OutboundMessenger>,
        alert_tx: Option<mpsc::Sender<AdminAlert>>,
    ) -> Self {
        Self {
            conn: handle.shared_conn(),
            messenger,
            alert_tx,
            retry_base: Duration::from_secs(30),
        }
    }

    /// Shrink the retry backoff base (tests).
    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Main loop. Ticks every [`SCHEDULER_TICK_SECS`] until `shutdown`
    /// broadcasts true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval =
            tokio::time::interval(Duration::from_secs(SCHEDULER_TICK_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("scheduler sweep error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep: dispatch everything due, in (fire_at, created_at) order.
    /// Returns the number of successful dispatches.
    pub async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        // Collect due rows first so the connection lock is never held
        // across a network send.
        let due: Vec<ScheduledTask> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                "SELECT id, phone, payload, fire_at, repeat_rule, creator, status,
                        attempts, last_error, created_at, updated_at
                 FROM scheduled_tasks
                 WHERE status = 'pending' AND fire_at <= ?1
                   AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                 ORDER BY fire_at, created_at",
            )?;
            let rows: Vec<_> = stmt
                .query_map([&now_str], row_to_task)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut dispatched = 0usize;
        for task in due {
            let phone = match PhoneKey::parse(&task.phone) {
                Ok(p) => p,
                Err(e) => {
                    // Unparseable phone can never succeed — fail outright.
                    warn!(task_id = %task.id, error = %e, "task has invalid phone");
                    self.mark_failed(&task, &e.to_string()).await?;
                    continue;
                }
            };

            match self.messenger.send(&phone, &task.payload).await {
                Ok(()) => {
                    self.mark_sent(&task)?;
                    dispatched += 1;
                }
                Err(e) => {
                    self.record_attempt(&task, &e.to_string()).await?;
                }
            }
        }
        Ok(dispatched)
    }

    fn mark_sent(&self, task: &ScheduledTask) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_tasks SET status = 'sent', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, task.id],
        )?;
        info!(task_id = %task.id, phone = %task.phone, "task dispatched");

        // Repeat tasks spawn the next occurrence on success, anchored on
        // the previous fire_at so repeated sends never drift.
        if task.repeat != RepeatRule::None {
            if let Ok(prev) = DateTime::parse_from_rfc3339(&task.fire_at) {
                if let Some(next) = next_occurrence(prev.with_timezone(&Utc), task.repeat) {
                    let follow_up = ScheduledTask {
                        id: Uuid::new_v4().to_string(),
                        fire_at: next.to_rfc3339(),
                        status: TaskStatus::Pending,
                        attempts: 0,
                        last_error: None,
                        created_at: now.clone(),
                        updated_at: now.clone(),
                        ..task.clone()
                    };
                    insert_task(&conn, &follow_up)?;
                    info!(task_id = %follow_up.id, fire_at = %follow_up.fire_at, "repeat occurrence spawned");
                }
            }
        }
        Ok(())
    }

    async fn record_attempt(&self, task: &ScheduledTask, err: &str) -> Result<()> {
        let attempts = task.attempts + 1;
        if attempts >= MAX_ATTEMPTS {
            return self.mark_failed(task, err).await;
        }

        let backoff = self.retry_base * 2u32.pow(attempts.saturating_sub(1).min(10));
        let next_attempt =
            Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
        warn!(
            task_id = %task.id,
            attempts,
            retry_at = %next_attempt.to_rfc3339(),
            error = err,
            "dispatch failed, will retry"
        );

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_tasks
             SET attempts = ?1, last_error = ?2, next_attempt_at = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                attempts,
                err,
                next_attempt.to_rfc3339(),
                Utc::now().to_rfc3339(),
                task.id
            ],
        )?;
        Ok(())
    }

    async fn mark_failed(&self, task: &ScheduledTask, err: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE scheduled_tasks
                 SET status = 'failed', last_error = ?1, updated_at = ?2
                 WHERE id = ?3",
                rusqlite::params![err, Utc::now().to_rfc3339(), task.id],
            )?;
        }
        error!(task_id = %task.id, phone = %task.phone, error = err, "task failed permanently");

        if let Some(tx) = &self.alert_tx {
            let alert = AdminAlert::new(
                "scheduler_task_failed",
                format!(
                    "Scheduled message to {} failed after {} attempts: {}",
                    task.phone, MAX_ATTEMPTS, err
                ),
            );
            let _ = tx.send(alert).await;
        }
        Ok(())
    }
}

fn insert_task(conn: &Connection, task: &ScheduledTask) -> Result<()> {
    conn.execute(
        "INSERT INTO scheduled_tasks
         (id, phone, payload, fire_at, repeat_rule, creator, status,
          attempts, next_attempt_at, last_error, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,NULL,?9,?10,?11)",
        rusqlite::params![
            task.id,
            task.phone,
            task.payload,
            task.fire_at,
            task.repeat.to_string(),
            task.creator,
            task.status.to_string(),
            task.attempts,
            task.last_error,
            task.created_at,
            task.updated_at,
        ],
    )?;
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let repeat_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        phone: row.get(1)?,
        payload: row.get(2)?,
        fire_at: row.get(3)?,
        repeat: repeat_str.parse().unwrap_or(RepeatRule::None),
        creator: row.get(5)?,
        status: status_str.parse().unwrap_or(TaskStatus::Pending),
        attempts: row.get::<_, i64>(7)? as u32,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rainbow_channels::{ChannelError, ChannelStatus, MemoryMessenger};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn handle() -> SchedulerHandle {
        SchedulerHandle::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn phone() -> PhoneKey {
        PhoneKey::parse("60123456789").unwrap()
    }

    #[tokio::test]
    async fn dispatches_due_tasks_in_creation_order() {
        let handle = handle();
        let messenger = MemoryMessenger::new();
        let engine = SchedulerEngine::new(&handle, messenger.clone(), None);

        let soon = Utc::now() + chrono::Duration::milliseconds(30);
        handle
            .schedule(&phone(), "first", soon, RepeatRule::None, "test")
            .unwrap();
        handle
            .schedule(&phone(), "second", soon, RepeatRule::None, "test")
            .unwrap();

        // Not yet due: nothing may fire early.
        assert_eq!(engine.sweep().await.unwrap(), 0);
        assert!(messenger.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.sweep().await.unwrap(), 2);
        let sent = messenger.sent();
        assert_eq!(sent[0].text, "first");
        assert_eq!(sent[1].text, "second");

        let tasks = handle.list().unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Sent));
    }

    #[tokio::test]
    async fn schedule_rejects_past_fire_at() {
        let handle = handle();
        let past = Utc::now() - chrono::Duration::minutes(1);
        assert!(matches!(
            handle.schedule(&phone(), "late", past, RepeatRule::None, "test"),
            Err(SchedulerError::InvalidFireAt { .. })
        ));
    }

    #[tokio::test]
    async fn repeat_task_spawns_next_occurrence_from_previous_fire_at() {
        let handle = handle();
        let messenger = MemoryMessenger::new();
        let engine = SchedulerEngine::new(&handle, messenger.clone(), None);

        let soon = Utc::now() + chrono::Duration::milliseconds(20);
        handle
            .schedule(&phone(), "water the plants", soon, RepeatRule::Daily, "staff")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(engine.sweep().await.unwrap(), 1);

        let tasks = handle.list().unwrap();
        assert_eq!(tasks.len(), 2);
        let pending: Vec<_> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);

        let prev = DateTime::parse_from_rfc3339(&soon.to_rfc3339()).unwrap();
        let next = DateTime::parse_from_rfc3339(&pending[0].fire_at).unwrap();
        assert_eq!(next - prev, chrono::Duration::days(1));
    }

    struct FlakyMessenger {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl rainbow_channels::OutboundMessenger for FlakyMessenger {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, _phone: &PhoneKey, _text: &str) -> std::result::Result<(), ChannelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ChannelError::SendFailed {
                    channel: "flaky".to_string(),
                    reason: "offline".to_string(),
                })
            } else {
                Ok(())
            }
        }
        async fn send_media(
            &self,
            _phone: &PhoneKey,
            _bytes: &[u8],
            _mime: &str,
            _caption: Option<&str>,
        ) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
        fn status(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    #[tokio::test]
    async fn failed_dispatch_retries_with_backoff_then_succeeds() {
        let handle = handle();
        let engine = SchedulerEngine::new(
            &handle,
            Arc::new(FlakyMessenger {
                fail_first: 1,
                calls: AtomicU32::new(0),
            }),
            None,
        )
        .with_retry_base(Duration::from_millis(10));

        let soon = Utc::now() + chrono::Duration::milliseconds(10);
        handle
            .schedule(&phone(), "retry me", soon, RepeatRule::None, "test")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(engine.sweep().await.unwrap(), 0);
        let tasks = handle.list().unwrap();
        assert_eq!(tasks[0].attempts, 1);
        assert_eq!(tasks[0].status, TaskStatus::Pending);

        // Backoff window passes; the retry succeeds.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.sweep().await.unwrap(), 1);
        assert_eq!(handle.list().unwrap()[0].status, TaskStatus::Sent);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed_and_alert_admin() {
        let handle = handle();
        let (tx, mut rx) = mpsc::channel(4);
        let engine = SchedulerEngine::new(
            &handle,
            Arc::new(FlakyMessenger {
                fail_first: u32::MAX,
                calls: AtomicU32::new(0),
            }),
            Some(tx),
        )
        .with_retry_base(Duration::from_millis(1));

        let soon = Utc::now() + chrono::Duration::milliseconds(5);
        handle
            .schedule(&phone(), "doomed", soon, RepeatRule::None, "test")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        for _ in 0..MAX_ATTEMPTS {
            engine.sweep().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(handle.list().unwrap()[0].status, TaskStatus::Failed);
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.code, "scheduler_task_failed");
    }

    #[tokio::test]
    async fn pending_for_lists_only_that_conversation() {
        let handle = handle();
        let later = Utc::now() + chrono::Duration::hours(1);
        handle
            .schedule(&phone(), "for you", later, RepeatRule::None, "staff")
            .unwrap();
        let other = PhoneKey::parse("60999999999").unwrap();
        handle
            .schedule(&other, "for someone else", later, RepeatRule::None, "staff")
            .unwrap();

        let mine = handle.pending_for(&phone()).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].payload, "for you");
    }

    #[tokio::test]
    async fn cancelled_tasks_never_dispatch() {
        let handle = handle();
        let messenger = MemoryMessenger::new();
        let engine = SchedulerEngine::new(&handle, messenger.clone(), None);

        let soon = Utc::now() + chrono::Duration::milliseconds(10);
        let task = handle
            .schedule(&phone(), "nope", soon, RepeatRule::None, "test")
            .unwrap();
        handle.cancel(&task.id).unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(engine.sweep().await.unwrap(), 0);
        assert!(messenger.sent().is_empty());
    }
}
