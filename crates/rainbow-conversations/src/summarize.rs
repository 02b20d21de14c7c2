//! Conversation head summarization.
//!
//! When a conversation's history grows past the configured threshold, the
//! oldest block is collapsed into a single `role=system` message flagged
//! `summary=true`. Prior summary blocks are folded into the new one, so
//! re-summarization keeps exactly one head summary with the same
//! entity-preservation guarantees.

use std::sync::Arc;

use tracing::{info, warn};

use rainbow_core::PhoneKey;
use rainbow_providers::{ChatRequest, Message, ProviderDirectory, TaskKind};

use crate::manager::ConversationStore;

/// The summarizer must keep these facts verbatim — losing a guest's name or
/// booking dates mid-conversation is the one unforgivable failure mode.
const SUMMARY_SYSTEM_PROMPT: &str = concat!(
    "You compress the beginning of a hostel guest conversation into a short ",
    "summary for the assistant's memory. You MUST preserve, exactly as stated: ",
    "the guest's name, booking dates, capsule or unit number, and the status ",
    "of any active complaint. Also keep stated preferences and unresolved ",
    "requests. Lines marked EARLIER SUMMARY are previous compressions — fold ",
    "their facts in, do not drop them. Reply with the summary text only, no ",
    "preamble."
);

/// Collapse the oldest messages into a summary when the history exceeds
/// `threshold`, keeping the newest `keep_tail` messages untouched.
///
/// Best-effort: a provider failure leaves the history as-is and the next
/// turn tries again.
pub async fn summarize_if_needed(
    store: Arc<ConversationStore>,
    providers: Arc<ProviderDirectory>,
    phone: PhoneKey,
    threshold: usize,
    keep_tail: usize,
) {
    let count = match store.message_count(&phone) {
        Ok(n) => n as usize,
        Err(e) => {
            warn!(phone = %phone, error = %e, "summarize: count failed");
            return;
        }
    };
    if count <= threshold {
        return;
    }

    let head_len = count.saturating_sub(keep_tail);
    let head = match store.oldest_messages(&phone, head_len) {
        Ok(msgs) if !msgs.is_empty() => msgs,
        Ok(_) => return,
        Err(e) => {
            warn!(phone = %phone, error = %e, "summarize: head read failed");
            return;
        }
    };

    info!(
        phone = %phone,
        total = count,
        compressing = head.len(),
        "summarize: threshold reached"
    );

    let transcript: String = head
        .iter()
        .map(|m| {
            if m.meta.summary {
                format!("EARLIER SUMMARY: {}", m.content)
            } else {
                format!("{}: {}", m.role.to_uppercase(), m.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let req = ChatRequest {
        model: String::new(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(format!(
            "Summarize this conversation so far:\n\n{}",
            transcript
        ))],
        max_tokens: 512,
    };

    let summary = match providers.chat(TaskKind::Summarize, &req, None).await {
        Ok((reply, _)) if !reply.content.trim().is_empty() => reply.content.trim().to_string(),
        Ok(_) => {
            warn!(phone = %phone, "summarize: empty summary, skipping");
            return;
        }
        Err(e) => {
            warn!(phone = %phone, error = %e, "summarize: provider call failed");
            return;
        }
    };

    let ids: Vec<i64> = head.iter().map(|m| m.id).collect();
    match store.replace_with_summary(&phone, &ids, &summary) {
        Ok(()) => info!(phone = %phone, replaced = ids.len(), "summarize: head compacted"),
        Err(e) => warn!(phone = %phone, error = %e, "summarize: replacement failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageMeta;
    use async_trait::async_trait;
    use rainbow_providers::{
        BreakerConfig, ChatReply, CircuitBreaker, LlmProvider, ProviderDescriptor, ProviderError,
        ProviderKind, RetryPolicy, Usage,
    };
    use rusqlite::Connection;
    use std::time::Duration;

    /// Echoes a canned summary that keeps whatever names it saw.
    struct FakeSummarizer;

    #[async_trait]
    impl LlmProvider for FakeSummarizer {
        fn name(&self) -> &str {
            "fake-summarizer"
        }
        async fn chat(&self, req: &ChatRequest) -> Result<ChatReply, ProviderError> {
            let keeps_john = req.messages[0].content.contains("John");
            Ok(ChatReply {
                content: if keeps_john {
                    "Guest John; booking 2 nights; no complaints.".to_string()
                } else {
                    "No notable facts.".to_string()
                },
                model: "fake".to_string(),
                usage: Usage::default(),
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn directory() -> Arc<ProviderDirectory> {
        let mut dir = ProviderDirectory::new(
            CircuitBreaker::new(BreakerConfig::default()),
            RetryPolicy::default(),
            Duration::from_secs(5),
        );
        dir.register(
            ProviderDescriptor {
                id: "fake".to_string(),
                kind: ProviderKind::Local,
                endpoint: None,
                model: "fake".to_string(),
                enabled: true,
                priority: 0,
                pinned: Default::default(),
                last_health_check: None,
            },
            Box::new(FakeSummarizer),
        );
        Arc::new(dir)
    }

    #[tokio::test]
    async fn summarizes_past_threshold_and_preserves_entities() {
        let store =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let phone = PhoneKey::parse("60123456789").unwrap();
        store.get_or_create(&phone).unwrap();

        store
            .append_message(&phone, "user", "My name is John", MessageMeta::default())
            .unwrap();
        for i in 0..10 {
            store
                .append_message(&phone, "user", &format!("filler {}", i), MessageMeta::default())
                .unwrap();
        }

        summarize_if_needed(store.clone(), directory(), phone.clone(), 8, 4).await;

        let history = store.history(&phone, 20).unwrap();
        // 11 messages → head of 7 replaced by one summary + tail of 4.
        assert_eq!(history.len(), 5);
        assert!(history[0].meta.summary);
        assert!(history[0].content.contains("John"));
    }

    #[tokio::test]
    async fn resummarization_folds_existing_summary() {
        let store =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let phone = PhoneKey::parse("60123456789").unwrap();
        store.get_or_create(&phone).unwrap();

        store
            .append_message(&phone, "user", "My name is John", MessageMeta::default())
            .unwrap();
        for i in 0..10 {
            store
                .append_message(&phone, "user", &format!("filler {}", i), MessageMeta::default())
                .unwrap();
        }
        summarize_if_needed(store.clone(), directory(), phone.clone(), 8, 4).await;

        // Grow the tail again and re-summarize; the summary block feeds in
        // as EARLIER SUMMARY and the entity survives.
        for i in 0..6 {
            store
                .append_message(&phone, "user", &format!("more {}", i), MessageMeta::default())
                .unwrap();
        }
        summarize_if_needed(store.clone(), directory(), phone.clone(), 8, 4).await;

        let history = store.history(&phone, 20).unwrap();
        let summaries: Vec<_> = history.iter().filter(|m| m.meta.summary).collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].content.contains("John"));
    }

    #[tokio::test]
    async fn below_threshold_is_untouched() {
        let store =
            Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let phone = PhoneKey::parse("60123456789").unwrap();
        store.get_or_create(&phone).unwrap();
        for i in 0..5 {
            store
                .append_message(&phone, "user", &format!("msg {}", i), MessageMeta::default())
                .unwrap();
        }

        summarize_if_needed(store.clone(), directory(), phone.clone(), 8, 4).await;
        assert_eq!(store.message_count(&phone).unwrap(), 5);
    }
}
