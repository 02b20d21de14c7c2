//! Provider selection — ordered descriptors, breaker-aware failover.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::provider::{ChatReply, ChatRequest, LlmProvider, ProviderError};
use crate::retry::{with_backoff, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cloud,
    Local,
}

/// What a model call is for. Tasks may pin a different model on the same
/// provider (e.g. a cheap model for classification, a bigger one for chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Chat,
    Classify,
    Summarize,
    Translate,
}

/// One entry in the `settings.json` provider list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub kind: ProviderKind,
    /// Base URL override; `None` means the adapter's default endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Default model for this provider.
    pub model: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Lower runs first.
    #[serde(default)]
    pub priority: u32,
    /// Per-task model pins, e.g. `{"classify": "claude-haiku-4-5"}`.
    #[serde(default)]
    pub pinned: BTreeMap<TaskKind, String>,
    /// Unix timestamp of the last successful call through this descriptor.
    #[serde(default)]
    pub last_health_check: Option<i64>,
}

fn bool_true() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn model_for(&self, task: TaskKind) -> &str {
        self.pinned.get(&task).map(String::as_str).unwrap_or(&self.model)
    }
}

struct Slot {
    descriptor: ProviderDescriptor,
    provider: Box<dyn LlmProvider>,
}

/// Priority-ordered provider set with circuit breaking and failover.
///
/// A request walks the slots in priority order, skipping disabled providers
/// and providers whose breaker rejects the call. Each slot gets its own
/// bounded-retry budget; when it is exhausted the request fails over to the
/// next slot. Rate limits fail over too — another provider may have quota.
pub struct ProviderDirectory {
    slots: Vec<Slot>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ProviderDirectory {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            slots: Vec::new(),
            breaker,
            policy,
            call_timeout,
        }
    }

    /// Register a provider behind its descriptor. Slots stay sorted by
    /// priority (stable for equal priorities — registration order).
    pub fn register(&mut self, descriptor: ProviderDescriptor, provider: Box<dyn LlmProvider>) {
        self.slots.push(Slot {
            descriptor,
            provider,
        });
        self.slots.sort_by_key(|s| s.descriptor.priority);
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.slots.iter().map(|s| s.descriptor.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Send a chat request to the first available provider, failing over
    /// down the priority list. Returns the reply plus the provider id that
    /// served it.
    pub async fn chat(
        &self,
        task: TaskKind,
        req: &ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<(ChatReply, String), ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let id = slot.descriptor.id.clone();
            if !slot.descriptor.enabled {
                continue;
            }
            if !self.breaker.allow(&id) {
                debug!(provider = %id, "skipping provider, circuit not closed");
                continue;
            }

            let mut pinned_req = req.clone();
            pinned_req.model = slot.descriptor.model_for(task).to_string();

            let provider = slot.provider.as_ref();
            let call_timeout = self.call_timeout;
            let started = Instant::now();
            let result = with_backoff(&self.policy, cancel, || {
                call_once(provider, &pinned_req, call_timeout)
            })
            .await;

            match result {
                Ok(reply) => {
                    self.breaker.record_success(&id);
                    info!(
                        provider = %id,
                        model = %reply.model,
                        latency_ms = started.elapsed().as_millis() as u64,
                        tokens_in = reply.usage.prompt_tokens,
                        tokens_out = reply.usage.completion_tokens,
                        "chat request served"
                    );
                    return Ok((reply, id));
                }
                // Cancellation is the caller's deadline, not a provider
                // fault — don't punish the breaker for it.
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(e) => {
                    self.breaker.record_failure(&id);
                    warn!(provider = %id, err = %e, "provider exhausted, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ProviderError::Unavailable("no providers available".to_string())))
    }
}

async fn call_once(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    timeout: Duration,
) -> Result<ChatReply, ProviderError> {
    match tokio::time::timeout(timeout, provider.chat(req)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Unavailable(format!(
            "{} call timed out after {}ms",
            provider.name(),
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::provider::{Message, Usage};
    use async_trait::async_trait;

    struct AlwaysFail;

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatReply, ProviderError> {
            Err(ProviderError::Unavailable("intentional failure".to_string()))
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            "always-ok"
        }
        async fn chat(&self, req: &ChatRequest) -> Result<ChatReply, ProviderError> {
            Ok(ChatReply {
                content: "ok".to_string(),
                model: req.model.clone(),
                usage: Usage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                },
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn descriptor(id: &str, priority: u32) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.to_string(),
            kind: ProviderKind::Cloud,
            endpoint: None,
            model: "test-model".to_string(),
            enabled: true,
            priority,
            pinned: BTreeMap::new(),
            last_health_check: None,
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn directory() -> ProviderDirectory {
        ProviderDirectory::new(
            CircuitBreaker::new(BreakerConfig::default()),
            quick_policy(),
            Duration::from_secs(5),
        )
    }

    fn request() -> ChatRequest {
        ChatRequest::new("You are a test.", vec![Message::user("hello")])
    }

    #[tokio::test]
    async fn fails_over_to_second_provider() {
        let mut dir = directory();
        dir.register(descriptor("bad", 0), Box::new(AlwaysFail));
        dir.register(descriptor("good", 1), Box::new(AlwaysOk));

        let (reply, provider) = dir.chat(TaskKind::Chat, &request(), None).await.unwrap();
        assert_eq!(reply.content, "ok");
        assert_eq!(provider, "good");
    }

    #[tokio::test]
    async fn errors_when_all_providers_fail() {
        let mut dir = directory();
        dir.register(descriptor("bad1", 0), Box::new(AlwaysFail));
        dir.register(descriptor("bad2", 1), Box::new(AlwaysFail));

        let result = dir.chat(TaskKind::Chat, &request(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disabled_providers_are_skipped() {
        let mut dir = directory();
        let mut bad = descriptor("bad", 0);
        bad.enabled = false;
        dir.register(bad, Box::new(AlwaysFail));
        dir.register(descriptor("good", 1), Box::new(AlwaysOk));

        let (_, provider) = dir.chat(TaskKind::Chat, &request(), None).await.unwrap();
        assert_eq!(provider, "good");
    }

    #[tokio::test]
    async fn task_pin_overrides_default_model() {
        let mut dir = directory();
        let mut desc = descriptor("good", 0);
        desc.pinned
            .insert(TaskKind::Classify, "tiny-model".to_string());
        dir.register(desc, Box::new(AlwaysOk));

        let (reply, _) = dir
            .chat(TaskKind::Classify, &request(), None)
            .await
            .unwrap();
        assert_eq!(reply.model, "tiny-model");

        let (reply, _) = dir.chat(TaskKind::Chat, &request(), None).await.unwrap();
        assert_eq!(reply.model, "test-model");
    }

    #[tokio::test]
    async fn repeated_failures_trip_breaker_and_skip_provider() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(60),
            cooldown_cap: Duration::from_secs(600),
        });
        let mut dir =
            ProviderDirectory::new(breaker.clone(), quick_policy(), Duration::from_secs(5));
        dir.register(descriptor("bad", 0), Box::new(AlwaysFail));
        dir.register(descriptor("good", 1), Box::new(AlwaysOk));

        // Two failing rounds trip the breaker for "bad".
        for _ in 0..2 {
            let _ = dir.chat(TaskKind::Chat, &request(), None).await;
        }
        assert_eq!(breaker.state("bad"), crate::breaker::CircuitState::Open);

        // Third round skips "bad" without calling it.
        let (_, provider) = dir.chat(TaskKind::Chat, &request(), None).await.unwrap();
        assert_eq!(provider, "good");
    }

    #[tokio::test]
    async fn descriptor_round_trips_through_settings_json() {
        let mut desc = descriptor("anthropic", 0);
        desc.pinned
            .insert(TaskKind::Classify, "claude-haiku-4-5".to_string());
        let json = serde_json::to_string(&desc).unwrap();
        let back: ProviderDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_for(TaskKind::Classify), "claude-haiku-4-5");
        assert_eq!(back.model_for(TaskKind::Chat), "test-model");
    }
}
