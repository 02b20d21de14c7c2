//! Durable per-phone conversation state.
//!
//! One row per guest phone number, an ordered message log with classifier
//! metadata, an append-only intent-prediction log for accuracy analytics,
//! and a global tag registry. All operations on a single conversation are
//! serialized by the per-phone worker that owns it (see rainbow-agent);
//! this crate guards the SQLite connection, not the ordering.

pub mod db;
pub mod error;
pub mod manager;
pub mod predictions;
pub mod summarize;
pub mod types;

pub use error::{ConversationError, Result};
pub use manager::ConversationStore;
pub use types::{
    AccuracyBucket, AccuracyReport, AccuracyRow, Conversation, Counters, IntentPrediction,
    LastIntent, MessageMeta, StoredMessage,
};
