//! Knowledge-base health tracking.
//!
//! Every reload attempt is recorded. After `FAILURE_THRESHOLD` consecutive
//! failures the `healthy` flag flips false (prompts degrade to static
//! fallback) and an admin alert fires, throttled to one per hour.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use rainbow_core::AdminAlert;

const FAILURE_THRESHOLD: u32 = 3;
const ALERT_THROTTLE: Duration = Duration::from_secs(3600);

pub struct KbHealth {
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    last_alert_at: Mutex<Option<Instant>>,
}

impl Default for KbHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl KbHealth {
    pub fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            last_alert_at: Mutex::new(None),
        }
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// A successful load clears the failure streak and restores health.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
    }

    /// Record a failed reload. Returns an alert to dispatch when the streak
    /// crosses the threshold and the hourly throttle allows it.
    pub fn record_failure(&self, detail: &str) -> Option<AdminAlert> {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(failures, detail, "knowledge base load failure");

        if failures < FAILURE_THRESHOLD {
            return None;
        }
        self.healthy.store(false, Ordering::Relaxed);

        let mut last = self.last_alert_at.lock().unwrap();
        let throttled = last.is_some_and(|t| t.elapsed() < ALERT_THROTTLE);
        if throttled {
            return None;
        }
        *last = Some(Instant::now());
        Some(AdminAlert::new(
            "kb_unhealthy",
            format!(
                "Knowledge base failed to load {} times in a row: {}. Serving static fallback replies.",
                failures, detail
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_fires_on_third_consecutive_failure() {
        let health = KbHealth::new();
        assert!(health.record_failure("io").is_none());
        assert!(health.record_failure("io").is_none());
        assert!(health.healthy());

        let alert = health.record_failure("io");
        assert!(alert.is_some());
        assert!(!health.healthy());
    }

    #[test]
    fn further_failures_are_throttled() {
        let health = KbHealth::new();
        for _ in 0..3 {
            health.record_failure("io");
        }
        // Fourth failure within the hour: unhealthy stays, no second alert.
        assert!(health.record_failure("io").is_none());
        assert!(!health.healthy());
    }

    #[test]
    fn success_resets_streak_and_health() {
        let health = KbHealth::new();
        for _ in 0..3 {
            health.record_failure("io");
        }
        health.record_success();
        assert!(health.healthy());
        // The streak starts over.
        assert!(health.record_failure("io").is_none());
    }
}
