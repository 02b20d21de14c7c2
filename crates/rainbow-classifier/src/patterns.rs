//! T1 — deterministic patterns for emergencies and high-priority requests.
//!
//! A match short-circuits the whole pipeline with confidence 1.0 and no
//! context. The list is static by design: these are the messages where a
//! misrouted reply is dangerous, so nothing here is hot-reloadable.

use once_cell::sync::Lazy;
use regex::Regex;

/// (intent, pattern) pairs, checked in order. Multilingual on purpose — a
/// theft report in Malay is just as urgent.
static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        (
            "emergency_theft",
            r"(?i)\b(stolen|theft|thief|robbed|rob|kecurian|dicuri|pencuri)\b|被偷|小偷|被盗",
        ),
        (
            "emergency_medical",
            r"(?i)\b(ambulance|emergency|unconscious|bleeding|heart attack|seizure|sakit teruk|pengsan|kecemasan)\b|救护车|晕倒|急救",
        ),
        (
            "emergency_fire",
            r"(?i)\b(fire|smoke|burning|kebakaran|api|asap)\b|着火|火灾|冒烟",
        ),
        (
            "card_locked",
            r"(?i)\b(locked out|card (is |was )?(not working|doesn'?t work|stopped working)|kad (tak|tidak) (boleh|berfungsi))\b|门卡(坏了|不能用)",
        ),
        (
            "police_request",
            r"(?i)\b(police|polis|balai polis)\b|警察|报警",
        ),
    ]
    .into_iter()
    .map(|(intent, pattern)| (intent, Regex::new(pattern).expect("static T1 pattern")))
    .collect()
});

/// Intents T1 can produce that must always escalate to staff.
pub const EMERGENCY_INTENTS: &[&str] = &[
    "emergency_theft",
    "emergency_medical",
    "emergency_fire",
];

pub fn is_emergency_intent(intent: &str) -> bool {
    EMERGENCY_INTENTS.contains(&intent)
}

/// Run the deterministic tier. First matching pattern wins.
pub fn classify_deterministic(text: &str) -> Option<&'static str> {
    PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(intent, _)| *intent)
}
