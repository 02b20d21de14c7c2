//! Topic routing — which topic files a request needs.
//!
//! Progressive disclosure: the retriever loads the intersection of what the
//! intent and the message text point at, never the whole corpus. The table
//! lives in code; `AGENTS.md` in the knowledge directory documents it for
//! operators.

/// intent → topic files.
const BY_INTENT: &[(&str, &[&str])] = &[
    ("booking", &["rates", "rooms", "policies"]),
    ("check_in", &["checkin", "policies", "directions"]),
    ("check_out", &["checkin", "policies"]),
    ("rates", &["rates", "rooms"]),
    ("wifi_password", &["facilities"]),
    ("facilities", &["facilities"]),
    ("directions", &["directions", "transport"]),
    ("transport", &["transport", "directions"]),
    ("food", &["food", "facilities"]),
    ("complaint", &["policies", "complaints"]),
    ("card_locked", &["checkin", "facilities"]),
    ("lost_found", &["policies"]),
    ("attractions", &["attractions", "transport"]),
];

/// message keyword → topic files, for LLM replies where the intent alone is
/// too coarse ("what floor is the laundry on" classifies as facilities, but
/// "laundry" narrows it).
const BY_KEYWORD: &[(&str, &[&str])] = &[
    ("wifi", &["facilities"]),
    ("laundry", &["facilities"]),
    ("luggage", &["facilities", "policies"]),
    ("breakfast", &["food"]),
    ("parking", &["directions", "transport"]),
    ("airport", &["transport"]),
    ("train", &["transport"]),
    ("bus", &["transport"]),
    ("refund", &["policies"]),
    ("deposit", &["policies", "rates"]),
    ("price", &["rates"]),
    ("harga", &["rates"]),
    ("tandas", &["facilities"]),
    ("bilik", &["rooms", "rates"]),
];

/// Topics for (intent, message), deduplicated in selection order.
pub fn select_topics(intent: &str, text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut out: Vec<String> = Vec::new();

    if let Some((_, topics)) = BY_INTENT.iter().find(|(i, _)| *i == intent) {
        for t in *topics {
            push_unique(&mut out, t);
        }
    }
    for (kw, topics) in BY_KEYWORD {
        if lower.contains(kw) {
            for t in *topics {
                push_unique(&mut out, t);
            }
        }
    }
    out
}

fn push_unique(out: &mut Vec<String>, topic: &str) {
    if !out.iter().any(|t| t == topic) {
        out.push(topic.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_routes_to_its_topics() {
        let topics = select_topics("booking", "I want a bed");
        assert_eq!(topics, vec!["rates", "rooms", "policies"]);
    }

    #[test]
    fn keywords_refine_the_selection() {
        let topics = select_topics("facilities", "is there breakfast?");
        assert!(topics.contains(&"facilities".to_string()));
        assert!(topics.contains(&"food".to_string()));
    }

    #[test]
    fn duplicates_are_collapsed() {
        let topics = select_topics("rates", "what is the price per night");
        assert_eq!(
            topics.iter().filter(|t| t.as_str() == "rates").count(),
            1
        );
    }

    #[test]
    fn unknown_intent_with_no_keywords_selects_nothing() {
        assert!(select_topics("unknown", "blah").is_empty());
    }
}
