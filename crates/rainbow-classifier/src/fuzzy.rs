//! T2 — bounded edit-distance keyword matching.
//!
//! Two rules guard against false positives on short input:
//! 1. a full-string match (whole query vs. whole keyword) always wins;
//! 2. substring matching only engages when the query has at least 4 words
//!    AND at least 18 characters — "k" must never substring-match "ok".
//! Single-word queries are stricter still: exact keyword membership only.

use std::collections::BTreeMap;

use strsim::normalized_levenshtein;

const SUBSTRING_MIN_WORDS: usize = 4;
const SUBSTRING_MIN_CHARS: usize = 18;
/// Confidence assigned to an exact-substring hit inside a long query.
const SUBSTRING_CONFIDENCE: f64 = 0.9;

/// Match `text` against the configured keyword lists.
///
/// Returns the best `(intent, confidence)` at or above `threshold`.
pub fn classify_fuzzy(
    text: &str,
    keywords: &BTreeMap<String, Vec<String>>,
    threshold: f64,
) -> Option<(String, f64)> {
    let query = normalize(text);
    if query.is_empty() {
        return None;
    }
    let word_count = query.split_whitespace().count();
    let allow_substring =
        word_count >= SUBSTRING_MIN_WORDS && query.chars().count() >= SUBSTRING_MIN_CHARS;

    let mut best: Option<(String, f64)> = None;
    for (intent, kws) in keywords {
        for kw in kws {
            let kw_norm = normalize(kw);
            if kw_norm.is_empty() {
                continue;
            }

            let score = if query == kw_norm {
                1.0
            } else if word_count == 1 {
                // Short single-word queries only match exact keywords;
                // "helo" must not fuzz into "hello" on one word of signal.
                continue;
            } else {
                let mut s = normalized_levenshtein(&query, &kw_norm);
                if allow_substring && query.contains(&kw_norm) {
                    s = s.max(SUBSTRING_CONFIDENCE);
                }
                s
            };

            if score >= threshold && best.as_ref().is_none_or(|(_, b)| score > *b) {
                best = Some((intent.clone(), score));
            }
        }
    }
    best
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
