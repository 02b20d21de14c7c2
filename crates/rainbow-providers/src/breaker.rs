//! Per-provider circuit breakers.
//!
//! State machine per provider id: `closed` (allow) → `open` after enough
//! failures inside the rolling window (reject for a cooldown) → `half-open`
//! (one probe) → back to `closed` on probe success, or `open` again with the
//! cooldown doubled up to a cap. Transitions are atomic; anyone may read a
//! snapshot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within `window` that trip the breaker.
    pub failure_threshold: u32,
    /// Rolling window for counting failures while closed.
    pub window: Duration,
    /// Initial open-state cooldown.
    pub cooldown: Duration,
    /// Cooldown doubles on each failed probe, up to this cap.
    pub cooldown_cap: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            cooldown_cap: Duration::from_secs(600),
        }
    }
}

/// Public snapshot of one provider's breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub recent_failures: u32,
    pub cooldown_ms: u64,
}

struct Entry {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_outstanding: bool,
}

impl Entry {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            cooldown,
            probe_outstanding: false,
        }
    }

    fn prune(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        while self.failures.front().is_some_and(|t| *t < cutoff) {
            self.failures.pop_front();
        }
    }
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: DashMap<String, Entry>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            entries: DashMap::new(),
        })
    }

    /// Whether a request may go out to `provider` right now.
    ///
    /// An open breaker past its cooldown flips to half-open here and admits
    /// exactly one probe; further calls are rejected until the probe's
    /// outcome is recorded.
    pub fn allow(&self, provider: &str) -> bool {
        let mut entry = self
            .entries
            .entry(provider.to_string())
            .or_insert_with(|| Entry::new(self.config.cooldown));

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= entry.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_outstanding = true;
                    info!(provider, "circuit half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_outstanding {
                    false
                } else {
                    entry.probe_outstanding = true;
                    true
                }
            }
        }
    }

    /// Record a successful call. A half-open probe success closes the
    /// circuit and resets the cooldown to its base value.
    pub fn record_success(&self, provider: &str) {
        let mut entry = self
            .entries
            .entry(provider.to_string())
            .or_insert_with(|| Entry::new(self.config.cooldown));

        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Closed;
                entry.failures.clear();
                entry.opened_at = None;
                entry.cooldown = self.config.cooldown;
                entry.probe_outstanding = false;
                info!(provider, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                entry.failures.clear();
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. Trips a closed breaker once the windowed count
    /// reaches the threshold; a failed probe reopens with a doubled cooldown.
    pub fn record_failure(&self, provider: &str) {
        let mut entry = self
            .entries
            .entry(provider.to_string())
            .or_insert_with(|| Entry::new(self.config.cooldown));

        match entry.state {
            CircuitState::Closed => {
                entry.prune(self.config.window);
                entry.failures.push_back(Instant::now());
                if entry.failures.len() as u32 >= self.config.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    warn!(
                        provider,
                        failures = entry.failures.len(),
                        cooldown_ms = entry.cooldown.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                entry.cooldown = (entry.cooldown * 2).min(self.config.cooldown_cap);
                entry.probe_outstanding = false;
                warn!(
                    provider,
                    cooldown_ms = entry.cooldown.as_millis() as u64,
                    "probe failed, circuit re-opened"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Current state without mutating anything. An open breaker past its
    /// cooldown still reports `Open` until the next `allow` admits a probe.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.entries
            .get(provider)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot all tracked breakers.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        self.entries
            .iter()
            .map(|e| BreakerSnapshot {
                provider: e.key().clone(),
                state: e.value().state,
                recent_failures: e.value().failures.len() as u32,
                cooldown_ms: e.value().cooldown.as_millis() as u64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            window: Duration::from_secs(10),
            cooldown: Duration::from_millis(20),
            cooldown_cap: Duration::from_millis(100),
        }
    }

    #[test]
    fn trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..2 {
            breaker.record_failure("p");
            assert_eq!(breaker.state("p"), CircuitState::Closed);
        }
        breaker.record_failure("p");
        assert_eq!(breaker.state("p"), CircuitState::Open);
        assert!(!breaker.allow("p"));
    }

    #[test]
    fn success_resets_windowed_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        breaker.record_failure("p");
        breaker.record_failure("p");
        breaker.record_success("p");
        breaker.record_failure("p");
        breaker.record_failure("p");
        assert_eq!(breaker.state("p"), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_single_probe_then_closes_on_success() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("p");
        }
        assert_eq!(breaker.state("p"), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow("p"));
        assert_eq!(breaker.state("p"), CircuitState::HalfOpen);
        // Second caller during the probe is rejected.
        assert!(!breaker.allow("p"));

        breaker.record_success("p");
        assert_eq!(breaker.state("p"), CircuitState::Closed);
        assert!(breaker.allow("p"));
    }

    #[test]
    fn failed_probe_reopens_with_doubled_cooldown() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("p");
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.allow("p"));
        breaker.record_failure("p");
        assert_eq!(breaker.state("p"), CircuitState::Open);

        let snap = breaker.snapshot();
        let entry = snap.iter().find(|s| s.provider == "p").unwrap();
        assert_eq!(entry.cooldown_ms, 40);

        // Old cooldown has passed but the doubled one has not.
        std::thread::sleep(Duration::from_millis(25));
        assert!(!breaker.allow("p"));
    }

    #[test]
    fn cooldown_is_capped() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure("p");
        }
        for _ in 0..6 {
            std::thread::sleep(Duration::from_millis(110));
            assert!(breaker.allow("p"));
            breaker.record_failure("p");
        }
        let snap = breaker.snapshot();
        let entry = snap.iter().find(|s| s.provider == "p").unwrap();
        assert!(entry.cooldown_ms <= 100);
    }

    #[test]
    fn unknown_provider_is_closed() {
        let breaker = CircuitBreaker::new(fast_config());
        assert_eq!(breaker.state("nobody"), CircuitState::Closed);
        assert!(breaker.allow("nobody"));
    }
}
