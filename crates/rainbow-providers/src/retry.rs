use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::provider::ProviderError;

/// Backoff policy for retries against a single provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 400,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for `attempt` (0-based) with up to 25% jitter.
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jitter = rand::rng().random_range(0..=exp / 4);
        Duration::from_millis(exp + jitter)
    }
}

/// Run `op` with bounded retries.
///
/// 429s wait at least the server-requested delay; retriable errors (network,
/// 5xx) back off exponentially with jitter; other 4xx and parse errors
/// surface immediately. Cancellation aborts between attempts and during
/// backoff sleeps — a cancelled call never records usage.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err: Option<ProviderError> = None;

    for attempt in 0..policy.max_attempts {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(ProviderError::Cancelled);
        }

        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt, "request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let retries_left = attempt + 1 < policy.max_attempts;
                let delay = match &e {
                    ProviderError::RateLimited { retry_after_ms } if retries_left => Some(
                        policy.delay(attempt).max(Duration::from_millis(*retry_after_ms)),
                    ),
                    other if other.is_retriable() && retries_left => Some(policy.delay(attempt)),
                    _ => None,
                };

                match delay {
                    Some(d) => {
                        warn!(attempt, err = %e, delay_ms = d.as_millis() as u64, "retrying after backoff");
                        last_err = Some(e);
                        match cancel {
                            Some(c) => {
                                tokio::select! {
                                    _ = tokio::time::sleep(d) => {}
                                    _ = c.cancelled() => return Err(ProviderError::Cancelled),
                                }
                            }
                            None => tokio::time::sleep(d).await,
                        }
                    }
                    None => return Err(e),
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("retries exhausted".to_string())))
}
