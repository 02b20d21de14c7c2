//! Knowledge retrieval with progressive disclosure.
//!
//! Topics are plain-text files in a flat directory; `AGENTS.md` in the same
//! directory documents the always-on set for operators (the file is prose,
//! not parsed). The retriever composes: always-on segments (identity,
//! durable memory, today's + yesterday's operational log) plus topics
//! selected per intent/keyword — never the full corpus. Repeated load
//! failures flip a health flag and degrade every prompt to static-fallback
//! mode until a reload succeeds.

pub mod error;
pub mod health;
pub mod prompt;
pub mod router;
pub mod topics;

pub use error::{KnowledgeError, Result};
pub use health::KbHealth;
pub use prompt::{hardcoded_staff_reply, BuiltPrompt, KnowledgeRetriever, STATIC_FALLBACK_MARKER};
pub use router::select_topics;
pub use topics::TopicStore;
