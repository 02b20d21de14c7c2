//! Prompt composition, healthy and degraded.

use tracing::{debug, warn};

use rainbow_core::{AdminAlert, Lang};

use crate::health::KbHealth;
use crate::router::select_topics;
use crate::topics::{TopicStore, ALWAYS_ON};

/// Marker present in every prompt built while the knowledge base is
/// unhealthy. Tests and the ops dashboard grep for it.
pub const STATIC_FALLBACK_MARKER: &str = "[static-fallback-mode]";

/// A composed prompt plus bookkeeping for message metadata.
#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    /// Topic names actually included (empty in degraded mode).
    pub topics_used: Vec<String>,
    pub degraded: bool,
}

pub struct KnowledgeRetriever {
    topics: TopicStore,
    health: KbHealth,
}

impl KnowledgeRetriever {
    pub fn new(topics: TopicStore) -> Self {
        Self {
            topics,
            health: KbHealth::new(),
        }
    }

    pub fn healthy(&self) -> bool {
        self.health.healthy()
    }

    /// Re-read the always-on set from disk. This is the health probe: a
    /// failure here counts toward the unhealthy threshold and the returned
    /// alert (if any) must reach the admin channel.
    pub fn reload(&self) -> Option<AdminAlert> {
        self.topics.invalidate();
        for name in ALWAYS_ON {
            if let Err(e) = self.topics.load(name) {
                return self.health.record_failure(&e.to_string());
            }
        }
        self.health.record_success();
        None
    }

    /// Compose the system prompt for one LLM reply.
    ///
    /// Healthy: always-on segments + topics selected by (intent, message).
    /// Unhealthy: a minimal degraded prompt carrying
    /// [`STATIC_FALLBACK_MARKER`] that steers the model to static replies or
    /// a staff handoff.
    pub fn build_prompt(&self, intent: &str, message: &str) -> BuiltPrompt {
        if !self.health.healthy() {
            return BuiltPrompt {
                text: degraded_prompt(),
                topics_used: Vec::new(),
                degraded: true,
            };
        }

        let mut sections: Vec<String> = Vec::new();
        let mut used: Vec<String> = Vec::new();
        let mut failures = 0usize;

        for name in ALWAYS_ON {
            match self.topics.load(name) {
                Ok(text) => sections.push(text),
                Err(e) => {
                    warn!(topic = name, error = %e, "always-on topic unavailable");
                    failures += 1;
                }
            }
        }

        // Today's and yesterday's operational log. Missing log files are
        // normal (quiet days), not a health signal.
        let today = chrono::Utc::now().date_naive();
        for date in [today, today.pred_opt().unwrap_or(today)] {
            if let Ok(text) = self.topics.load(&TopicStore::log_topic(date)) {
                sections.push(text);
            }
        }

        for name in select_topics(intent, message) {
            match self.topics.load(&name) {
                Ok(text) => {
                    sections.push(text);
                    used.push(name);
                }
                Err(e) => {
                    warn!(topic = %name, error = %e, "routed topic unavailable");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            // Partial reads degrade accuracy but not availability; the
            // reload probe owns the health verdict.
            debug!(failures, "prompt built with missing topics");
        }

        BuiltPrompt {
            text: sections.join("\n\n"),
            topics_used: used,
            degraded: false,
        }
    }
}

fn degraded_prompt() -> String {
    format!(
        "{} The knowledge base is currently unavailable, so you are operating \
         in static fallback mode. Answer only from the pre-loaded static \
         replies you were given. If no static reply fits, apologise briefly \
         and direct the guest to the front desk staff. Do not invent hostel \
         details.",
        STATIC_FALLBACK_MARKER
    )
}

/// Last-resort reply when even static replies cannot be read. Trilingual,
/// with the staff contact numbers inlined.
pub fn hardcoded_staff_reply(lang: Lang, staff_phones: &[String]) -> String {
    let phones = if staff_phones.is_empty() {
        "the front desk".to_string()
    } else {
        staff_phones.join(" / ")
    };
    match lang {
        Lang::Ms => format!(
            "Maaf, sistem kami menghadapi masalah buat sementara. Sila hubungi staf kami di {} untuk bantuan segera.",
            phones
        ),
        Lang::Zh => format!("抱歉，系统暂时出现问题。请联系我们的工作人员：{}。", phones),
        Lang::En | Lang::Unknown => format!(
            "Sorry, our system is having trouble right now. Please contact our staff at {} for immediate help.",
            phones
        ),
    }
}
