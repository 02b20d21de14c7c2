use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rainbow_core::Tier;
use rainbow_language::Detection;

/// The classifier's answer for one message.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Canonical intent name; `"unknown"` when nothing accepted.
    pub intent: String,
    pub confidence: f64,
    /// Which tier accepted. `None` only when every tier was disabled.
    pub tier: Option<Tier>,
    /// Language router output, passed through for the reply resolver.
    pub detected: Detection,
    /// Model id when T4 produced the answer.
    pub model: Option<String>,
    pub response_ms: u64,
}

impl Classification {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn is_unknown(&self) -> bool {
        self.intent == Self::UNKNOWN
    }
}

/// Per-tier settings from `settings.json`. Disabling a tier skips it without
/// changing how the others behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub enabled: bool,
    /// Recent turns handed to the tier as context (0 = stateless).
    pub context_messages: usize,
    /// Acceptance threshold — meaningful for T2/T3 only.
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSettings {
    #[serde(default = "default_t1")]
    pub t1: TierConfig,
    #[serde(default = "default_t2")]
    pub t2: TierConfig,
    #[serde(default = "default_t3")]
    pub t3: TierConfig,
    #[serde(default = "default_t4")]
    pub t4: TierConfig,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self {
            t1: default_t1(),
            t2: default_t2(),
            t3: default_t3(),
            t4: default_t4(),
        }
    }
}

fn default_t1() -> TierConfig {
    TierConfig {
        enabled: true,
        context_messages: 0,
        threshold: None,
    }
}
fn default_t2() -> TierConfig {
    TierConfig {
        enabled: true,
        context_messages: 0,
        threshold: Some(0.80),
    }
}
fn default_t3() -> TierConfig {
    TierConfig {
        enabled: true,
        context_messages: 3,
        threshold: Some(0.70),
    }
}
fn default_t4() -> TierConfig {
    TierConfig {
        enabled: true,
        context_messages: 5,
        threshold: None,
    }
}

/// One intent in the taxonomy handed to the T4 prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub name: String,
    /// One-line description; empty is tolerated but hurts T4 accuracy.
    #[serde(default)]
    pub description: String,
}

/// Snapshot of everything the tier pipeline needs for one classification.
/// Assembled per-turn from the config store so hot reloads apply cleanly
/// between turns, never mid-pipeline.
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    pub settings: IntentSettings,
    /// `intent-keywords.json`: intent → multilingual keyword list.
    pub keywords: BTreeMap<String, Vec<String>>,
    /// `intent-examples.json`: intent → curated example utterances.
    pub examples: BTreeMap<String, Vec<String>>,
    /// Taxonomy for the T4 prompt.
    pub taxonomy: Vec<IntentSpec>,
}
