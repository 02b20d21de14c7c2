//! T4 — LLM fallback classification.
//!
//! The message plus the intent taxonomy (names and one-line descriptions)
//! goes to a provider pinned for classification; the reply is parsed down
//! to a single intent name. Models love synonyms ("reserve" for "booking"),
//! so a post-correction pass maps near-misses onto canonical names.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use rainbow_providers::{
    ChatRequest, Message, ProviderDirectory, ProviderError, TaskKind,
};

use crate::types::{Classification, IntentSpec};

/// Confidence assigned when the model names a taxonomy intent directly.
const DIRECT_CONFIDENCE: f64 = 0.9;
/// Confidence after synonym post-correction.
const MAPPED_CONFIDENCE: f64 = 0.75;

pub struct LlmOutcome {
    pub intent: String,
    pub confidence: f64,
    pub model: String,
}

/// Classify via the LLM tier. Always produces an intent — `unknown` when the
/// model can't place the message.
pub async fn classify_llm(
    providers: &ProviderDirectory,
    taxonomy: &[IntentSpec],
    context: &[Message],
    text: &str,
    cancel: Option<&CancellationToken>,
) -> Result<LlmOutcome, ProviderError> {
    let mut system = String::from(
        "You classify hostel guest messages into exactly one intent. \
         Classify regardless of the message's language. Reply with only the \
         intent name, nothing else. If none fit, reply: unknown.\n\nIntents:\n",
    );
    for spec in taxonomy {
        system.push_str(&format!("- {}: {}\n", spec.name, spec.description));
    }

    let mut messages: Vec<Message> = context.to_vec();
    messages.push(Message::user(format!("Classify this message: {}", text)));

    let req = ChatRequest {
        model: String::new(),
        system,
        messages,
        max_tokens: 32,
    };

    let (reply, _) = providers.chat(TaskKind::Classify, &req, cancel).await?;
    let raw = reply.content.trim();

    let (intent, confidence) = match resolve_intent(raw, taxonomy) {
        Resolved::Direct(name) => (name, DIRECT_CONFIDENCE),
        Resolved::Mapped(name) => (name, MAPPED_CONFIDENCE),
        Resolved::Unknown => (Classification::UNKNOWN.to_string(), 0.3),
    };

    debug!(raw = %raw, intent = %intent, "llm tier classified");
    Ok(LlmOutcome {
        intent,
        confidence,
        model: reply.model,
    })
}

enum Resolved {
    Direct(String),
    Mapped(String),
    Unknown,
}

/// Normalise the model's answer and map synonyms to canonical intents.
fn resolve_intent(raw: &str, taxonomy: &[IntentSpec]) -> Resolved {
    let normalized = normalize(raw);
    if normalized.is_empty() || normalized == Classification::UNKNOWN {
        return Resolved::Unknown;
    }

    if taxonomy.iter().any(|s| s.name == normalized) {
        return Resolved::Direct(normalized);
    }

    if let Some(mapped) = map_llm_intent(&normalized, taxonomy) {
        return Resolved::Mapped(mapped);
    }

    Resolved::Unknown
}

/// Post-correction table for common paraphrases, then a containment pass
/// against the taxonomy ("booking_request" → "booking").
pub fn map_llm_intent(name: &str, taxonomy: &[IntentSpec]) -> Option<String> {
    const SYNONYMS: &[(&str, &str)] = &[
        ("book", "booking"),
        ("reserve", "booking"),
        ("reservation", "booking"),
        ("booking_request", "booking"),
        ("hello", "greeting"),
        ("hi", "greeting"),
        ("greetings", "greeting"),
        ("welcome", "greeting"),
        ("complain", "complaint"),
        ("complaint_handling", "complaint"),
        ("problem", "complaint"),
        ("checkin", "check_in"),
        ("check-in", "check_in"),
        ("arrival", "check_in"),
        ("checkout", "check_out"),
        ("check-out", "check_out"),
        ("departure", "check_out"),
        ("price", "rates"),
        ("pricing", "rates"),
        ("cost", "rates"),
        ("wifi", "wifi_password"),
        ("internet", "wifi_password"),
        ("emergency_help", "emergency_medical"),
        ("goodbye", "farewell"),
        ("bye", "farewell"),
        ("thanks", "thanks"),
        ("thank_you", "thanks"),
    ];

    let has = |candidate: &str| taxonomy.iter().any(|s| s.name == candidate);

    if let Some((_, canonical)) = SYNONYMS.iter().find(|(k, _)| *k == name) {
        if has(canonical) {
            return Some(canonical.to_string());
        }
    }

    // Containment either way: "make_booking" → "booking".
    taxonomy
        .iter()
        .find(|s| name.contains(&s.name) || s.name.contains(name))
        .map(|s| s.name.clone())
}

fn normalize(raw: &str) -> String {
    raw.lines()
        .next()
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
