//! Tier orchestration: T1 → T2 → T3 → T4, first acceptance wins.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rainbow_core::Tier;
use rainbow_language::Detection;
use rainbow_providers::{EmbeddingProvider, Message, ProviderDirectory};

use crate::fuzzy::classify_fuzzy;
use crate::llm::classify_llm;
use crate::patterns::classify_deterministic;
use crate::semantic::SemanticMatcher;
use crate::types::{Classification, ClassifierConfig};

const DEFAULT_T2_THRESHOLD: f64 = 0.80;
const DEFAULT_T3_THRESHOLD: f64 = 0.70;

pub struct TieredClassifier {
    providers: Arc<ProviderDirectory>,
    semantic: Option<SemanticMatcher>,
}

impl TieredClassifier {
    /// `embedder = None` effectively disables the semantic tier even when
    /// settings enable it — there is nothing to embed with.
    pub fn new(
        providers: Arc<ProviderDirectory>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            providers,
            semantic: embedder.map(SemanticMatcher::new),
        }
    }

    /// Classify one message. Never fails: tier errors degrade to the next
    /// tier, and a total miss is the `unknown` intent.
    pub async fn classify(
        &self,
        text: &str,
        detection: Detection,
        context: &[Message],
        cfg: &ClassifierConfig,
        cancel: Option<&CancellationToken>,
    ) -> Classification {
        let started = Instant::now();
        let done = |intent: String, confidence: f64, tier: Option<Tier>, model: Option<String>| {
            Classification {
                intent,
                confidence,
                tier,
                detected: detection,
                model,
                response_ms: started.elapsed().as_millis() as u64,
            }
        };

        if cfg.settings.t1.enabled {
            if let Some(intent) = classify_deterministic(text) {
                debug!(intent, "T1 accepted");
                return done(intent.to_string(), 1.0, Some(Tier::T1), None);
            }
        }

        if cfg.settings.t2.enabled {
            let threshold = cfg.settings.t2.threshold.unwrap_or(DEFAULT_T2_THRESHOLD);
            if let Some((intent, confidence)) = classify_fuzzy(text, &cfg.keywords, threshold) {
                debug!(intent = %intent, confidence, "T2 accepted");
                return done(intent, confidence, Some(Tier::T2), None);
            }
        }

        if cfg.settings.t3.enabled {
            if let Some(semantic) = &self.semantic {
                let threshold = cfg.settings.t3.threshold.unwrap_or(DEFAULT_T3_THRESHOLD);
                match semantic.classify(text, &cfg.examples, threshold).await {
                    Ok(Some((intent, confidence))) => {
                        debug!(intent = %intent, confidence, "T3 accepted");
                        return done(intent, confidence, Some(Tier::T3), None);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "T3 failed, falling through"),
                }
            }
        }

        if cfg.settings.t4.enabled && !cfg.taxonomy.is_empty() {
            let window = cfg.settings.t4.context_messages;
            let tail = &context[context.len().saturating_sub(window)..];
            match classify_llm(&self.providers, &cfg.taxonomy, tail, text, cancel).await {
                Ok(outcome) => {
                    return done(
                        outcome.intent,
                        outcome.confidence,
                        Some(Tier::T4),
                        Some(outcome.model),
                    );
                }
                Err(e) => warn!(error = %e, "T4 failed"),
            }
        }

        done(Classification::UNKNOWN.to_string(), 0.0, None, None)
    }
}
