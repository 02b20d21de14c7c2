use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;

use rainbow_core::Lang;

/// Detection result: the primary language of a message plus a confidence
/// score in [0,1]. `Unknown` means "none of en/ms/zh" — the caller may
/// translate before classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub lang: Lang,
    pub confidence: f64,
}

impl Detection {
    fn new(lang: Lang, confidence: f64) -> Self {
        Self {
            lang,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Share of CJK codepoints above which a message counts as Chinese.
const CJK_RATIO_THRESHOLD: f64 = 0.25;
/// Minimum trigram overlap for either latin profile to claim the message.
const TRIGRAM_FLOOR: f64 = 0.12;

/// High-signal function words. A hit on one side with silence on the other is
/// the strongest latin-script signal we have — short messages ("apa", "bila")
/// never produce enough trigrams to classify statistically.
static MS_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "apa", "siapa", "bila", "mana", "macam", "bagaimana", "kenapa", "berapa", "saya", "awak",
        "kamu", "anda", "kami", "kita", "dia", "ini", "itu", "ada", "tak", "tidak", "nak",
        "hendak", "boleh", "tolong", "terima", "kasih", "selamat", "pagi", "petang", "malam",
        "tengahari", "bilik", "tandas", "makan", "minum", "bayar", "harga", "murah", "mahal",
        "esok", "semalam", "sekarang", "sudah", "belum", "dengan", "untuk", "dari", "pergi",
        "datang", "masuk", "keluar", "tempahan", "batal", "tukar", "kunci", "hilang", "sakit",
    ]
    .into_iter()
    .collect()
});

static EN_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "i", "you", "we", "they", "he", "she", "it",
        "my", "your", "our", "this", "that", "what", "who", "when", "where", "how", "why", "can",
        "could", "would", "should", "do", "does", "did", "have", "has", "had", "will", "not",
        "no", "yes", "please", "thanks", "thank", "hello", "hi", "hey", "there", "here", "to",
        "of", "in", "on", "at", "for", "with", "and", "or", "but", "time", "room", "book",
        "booking", "check", "checkin", "checkout", "key", "help", "need", "want", "lost",
    ]
    .into_iter()
    .collect()
});

/// Ranked common-trigram profiles built from the supported corpus. Order is
/// irrelevant at runtime — membership is what's scored.
static EN_TRIGRAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        " th", "the", "he ", "ing", "ng ", " an", "and", "nd ", " to", "to ", " in", "in ",
        "er ", "ed ", "en ", "es ", "re ", "on ", "at ", " of", "of ", " a ", "hat", "ent",
        "ion", "tio", " is", "is ", " yo", "you", "ou ", " ca", "can", " wh", "wha", " ha",
        "ave", " no", "not", "ot ", " be", " we", " ch", "che", "eck", "ck ", "oom", " ro",
    ]
    .into_iter()
    .collect()
});

static MS_TRIGRAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        " me", "mem", "men", "kan", "an ", "ang", "ng ", "ada", " ad", "dan", " da", "ah ",
        "lah", " sa", "say", "aya", " ke", "ke ", "nya", " di", "di ", "ber", " be", "ter",
        " te", "ita", " ki", "mak", "aka", "tak", " ta", "ak ", "apa", " ap", "pa ", " bo",
        "bol", "ole", "leh", "eh ", " na", "nak", " ba", "bat", "tal", " un", "unt", "tuk",
    ]
    .into_iter()
    .collect()
});

/// Detect the primary language of `text`.
///
/// Pipeline: CJK ratio → keyword heuristic → trigram profiles. Confidence
/// reflects how decisive the winning signal was, never which stage fired.
pub fn detect(text: &str) -> Detection {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Detection::new(Lang::Unknown, 0.0);
    }

    // Chinese first: script is a stronger signal than any statistics.
    let visible: Vec<char> = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let cjk = visible.iter().filter(|c| is_cjk(**c)).count();
    if !visible.is_empty() {
        let ratio = cjk as f64 / visible.len() as f64;
        if ratio >= CJK_RATIO_THRESHOLD {
            return Detection::new(Lang::Zh, 0.6 + 0.4 * ratio);
        }
    }

    let tokens: Vec<String> = trimmed
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Detection::new(Lang::Unknown, 0.0);
    }

    let ms_hits = tokens.iter().filter(|t| MS_KEYWORDS.contains(t.as_str())).count();
    let en_hits = tokens.iter().filter(|t| EN_KEYWORDS.contains(t.as_str())).count();

    if ms_hits != en_hits {
        let margin = ms_hits.abs_diff(en_hits).min(3) as f64;
        let lang = if ms_hits > en_hits { Lang::Ms } else { Lang::En };
        return Detection::new(lang, 0.7 + 0.1 * margin);
    }

    // Keyword tie (usually zero/zero): fall back to trigram overlap.
    let ms_score = trigram_overlap(trimmed, &MS_TRIGRAMS);
    let en_score = trigram_overlap(trimmed, &EN_TRIGRAMS);

    if ms_score.max(en_score) < TRIGRAM_FLOOR {
        // Neither profile recognises this text — most likely a language
        // outside the supported set.
        return Detection::new(Lang::Unknown, 0.6);
    }

    let (lang, winner, loser) = if ms_score >= en_score {
        (Lang::Ms, ms_score, en_score)
    } else {
        (Lang::En, en_score, ms_score)
    };
    // Decisiveness scales with the gap between profiles; capped below the
    // keyword-heuristic band on purpose.
    Detection::new(lang, (0.5 + (winner - loser) * 2.0).min(0.85))
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
        | 0x3400..=0x4DBF    // Extension A
        | 0x3000..=0x303F    // CJK punctuation
        | 0xFF00..=0xFFEF    // fullwidth forms
    )
}

/// Fraction of the text's trigrams present in a profile.
fn trigram_overlap(text: &str, profile: &HashSet<&'static str>) -> f64 {
    let padded: Vec<char> = format!(" {} ", text.to_lowercase()).chars().collect();
    if padded.len() < 3 {
        return 0.0;
    }
    let mut total = 0usize;
    let mut hits = 0usize;
    for window in padded.windows(3) {
        let tri: String = window.iter().collect();
        total += 1;
        if profile.contains(tri.as_str()) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
