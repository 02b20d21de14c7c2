//! Single-pass sentiment check feeding the escalation counters.
//!
//! Deliberately simple: a trilingual lexicon summed over the message. This
//! is an auxiliary signal, not a tier — the scoring function is pure so an
//! external scorer can replace it without touching the escalation policy.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

static LEXICON: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let negative: &[&str] = &[
        "ridiculous",
        "terrible",
        "awful",
        "horrible",
        "disgusting",
        "worst",
        "angry",
        "furious",
        "upset",
        "disappointed",
        "disappointing",
        "unacceptable",
        "useless",
        "nobody",
        "ignored",
        "dirty",
        "filthy",
        "broken",
        "rude",
        "slow",
        "scam",
        "refund",
        "complaint",
        "teruk",
        "kotor",
        "lambat",
        "marah",
        "kecewa",
        "bodoh",
    ];
    let positive: &[&str] = &[
        "thanks",
        "thank",
        "great",
        "awesome",
        "perfect",
        "lovely",
        "nice",
        "good",
        "excellent",
        "amazing",
        "helpful",
        "love",
        "best",
        "kasih",
        "bagus",
        "cantik",
        "terbaik",
    ];
    for w in negative {
        map.insert(*w, -1);
    }
    for w in positive {
        map.insert(*w, 1);
    }
    map
});

/// CJK sentiment terms matched by substring (no word boundaries).
static ZH_NEGATIVE: &[&str] = &["差", "糟糕", "生气", "失望", "脏", "太慢", "投诉"];
static ZH_POSITIVE: &[&str] = &["谢谢", "很好", "太棒", "满意"];

/// Score one message: sum of lexicon weights, zero is neutral.
pub fn assess_sentiment(text: &str) -> Sentiment {
    let mut score = 0i32;
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        score += LEXICON.get(token).copied().unwrap_or(0);
    }
    for term in ZH_NEGATIVE {
        if text.contains(term) {
            score -= 1;
        }
    }
    for term in ZH_POSITIVE {
        if text.contains(term) {
            score += 1;
        }
    }

    match score.cmp(&0) {
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
        std::cmp::Ordering::Greater => Sentiment::Positive,
    }
}
