use serde::{Deserialize, Serialize};

use rainbow_core::{Lang, PhoneKey, ResponseMode, Tier, WorkflowCursor};

/// Escalation and repetition counters, updated on every classified turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Consecutive `unknown` intents; reset on any recognized intent.
    pub unknown_count: u32,
    /// Consecutive turns with the same recognized intent.
    pub repeat_count: u32,
    /// Consecutive negative-sentiment turns; reset on neutral/positive.
    pub consecutive_negative_count: u32,
    /// RFC3339 instant of the last sentiment escalation (cooldown anchor).
    pub last_sentiment_escalation_at: Option<String>,
}

/// The most recent recognized intent, kept on the conversation row so the
/// repeat counter survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastIntent {
    pub intent: String,
    pub confidence: f64,
    pub at: String,
}

/// One conversation, keyed by canonical phone. Never deleted — archive only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub phone: PhoneKey,
    pub language: Lang,
    pub display_name: Option<String>,
    pub assigned_unit: Option<String>,
    pub favourite: bool,
    pub pinned: bool,
    pub archived: bool,
    /// When set, overrides the global copilot/autopilot mode.
    pub response_mode: Option<ResponseMode>,
    /// Staff last-read watermark (RFC3339).
    pub last_read_at: Option<String>,
    pub counters: Counters,
    pub last_intent: Option<LastIntent>,
    pub workflow: Option<WorkflowCursor>,
    pub message_count: u32,
    pub total_tokens: u64,
    pub created_at: String,
    pub updated_at: String,
}

/// Classifier/runtime metadata stored with assistant messages. All fields
/// stay `None`/zero for human-origin (`manual`) messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    pub intent: Option<String>,
    pub confidence: Option<f64>,
    pub tier: Option<Tier>,
    pub model: Option<String>,
    pub response_ms: Option<u64>,
    /// Knowledge topics consulted for this reply.
    pub kb_topics: Vec<String>,
    pub action: Option<String>,
    pub workflow_id: Option<String>,
    pub step_id: Option<String>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    /// True when a human staff member sent the message.
    pub manual: bool,
    /// True for system-role summarization blocks.
    pub summary: bool,
}

/// One persisted message, ordered within its conversation by insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub phone: String,
    /// "user" | "assistant" | "system"
    pub role: String,
    pub content: String,
    pub created_at: String,
    #[serde(flatten)]
    pub meta: MessageMeta,
}

/// Append-only classification record for accuracy analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPrediction {
    pub id: i64,
    pub phone: String,
    pub message: String,
    pub intent: String,
    pub confidence: f64,
    pub tier: Tier,
    pub model: Option<String>,
    /// Set by staff feedback; "unknown" for a plain thumbs-down.
    pub actual_intent: Option<String>,
    /// `None` = not validated; validated rows drive the accuracy metric.
    pub was_correct: Option<bool>,
    pub created_at: String,
}

/// Validated/unvalidated counts for one analytics slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccuracyBucket {
    pub total: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub unvalidated: u64,
    /// `None` iff `correct + incorrect == 0` (rendered as "-").
    pub accuracy_rate: Option<f64>,
}

impl AccuracyBucket {
    pub fn finish(mut self) -> Self {
        let validated = self.correct + self.incorrect;
        self.accuracy_rate = if validated == 0 {
            None
        } else {
            Some(self.correct as f64 / validated as f64)
        };
        self
    }
}

/// One keyed row in a by-intent/by-tier/by-model breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyRow {
    pub key: String,
    #[serde(flatten)]
    pub bucket: AccuracyBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub overall: AccuracyBucket,
    pub by_intent: Vec<AccuracyRow>,
    pub by_tier: Vec<AccuracyRow>,
    pub by_model: Vec<AccuracyRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_rate_is_null_only_when_unvalidated() {
        let empty = AccuracyBucket {
            total: 5,
            unvalidated: 5,
            ..Default::default()
        }
        .finish();
        assert!(empty.accuracy_rate.is_none());

        let some = AccuracyBucket {
            total: 4,
            correct: 3,
            incorrect: 1,
            ..Default::default()
        }
        .finish();
        assert_eq!(some.accuracy_rate, Some(0.75));
    }
}
