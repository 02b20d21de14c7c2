//! Tiered intent classification.
//!
//! Four tiers run in order until one accepts: deterministic patterns (T1),
//! fuzzy keywords (T2), semantic embeddings (T3), LLM fallback (T4). Each
//! tier can be disabled independently via `settings.json` without changing
//! the semantics of the others. Cancel detection and the sentiment pass are
//! auxiliary single-pass checks, not tiers.

pub mod cancel;
pub mod fuzzy;
pub mod llm;
pub mod patterns;
pub mod pipeline;
pub mod semantic;
pub mod sentiment;
pub mod types;

pub use cancel::is_cancel_message;
pub use pipeline::TieredClassifier;
pub use sentiment::{assess_sentiment, Sentiment};
pub use types::{Classification, ClassifierConfig, IntentSettings, IntentSpec, TierConfig};
