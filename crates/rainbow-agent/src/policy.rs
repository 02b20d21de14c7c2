//! Router policy: (intent, confidence, conversation state) → action.
//!
//! Escalation overrides run before the routing table, in spec order:
//! emergency intents, the 3rd identical attempt, the 3rd consecutive
//! negative turn (with a cooldown so one bad morning doesn't page staff
//! every message).

use chrono::{DateTime, Utc};

use rainbow_classifier::patterns::is_emergency_intent;
use rainbow_conversations::Counters;
use rainbow_core::Action;

use crate::settings::RoutingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    Emergency,
    Repeat,
    Sentiment,
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub action: Action,
    pub escalation: Option<EscalationReason>,
    /// Append the capability menu to the reply (first-contact greeting).
    pub menu_hint: bool,
}

pub struct PolicyInput<'a> {
    pub intent: &'a str,
    pub confidence: f64,
    pub counters: &'a Counters,
    /// True when this turn opened the conversation (no prior messages).
    pub is_first_contact: bool,
    /// Copilot mode after applying the per-conversation override.
    pub copilot: bool,
    pub auto_approve_intents: &'a [String],
    pub routing: &'a RoutingTable,
    pub sentiment_cooldown_minutes: i64,
    pub now: DateTime<Utc>,
}

pub fn route(input: &PolicyInput<'_>) -> PolicyDecision {
    // Emergencies always reach staff, whatever else is going on.
    if is_emergency_intent(input.intent) {
        return decision(Action::Escalate, Some(EscalationReason::Emergency));
    }

    // 3rd identical attempt: the guest is going in circles — hand over.
    if input.counters.repeat_count >= 2 {
        return decision(Action::Escalate, Some(EscalationReason::Repeat));
    }

    // 3rd consecutive negative turn, at most once per cooldown window.
    if input.counters.consecutive_negative_count >= 3
        && sentiment_cooldown_passed(
            input.counters.last_sentiment_escalation_at.as_deref(),
            input.sentiment_cooldown_minutes,
            input.now,
        )
    {
        return decision(Action::Escalate, Some(EscalationReason::Sentiment));
    }

    // First contact + greeting: canned welcome plus the capability menu.
    if input.is_first_contact && input.intent == "greeting" {
        return PolicyDecision {
            action: Action::StaticReply,
            escalation: None,
            menu_hint: true,
        };
    }

    // Unrecognized input always gets the static unknown reply.
    if input.intent == "unknown" {
        return decision(Action::StaticReply, None);
    }

    // Copilot mode: auto-approved intents skip the human gate.
    if input.copilot {
        if input
            .auto_approve_intents
            .iter()
            .any(|i| i == input.intent)
        {
            return decision(Action::StaticReply, None);
        }
        return decision(Action::StaffReview, None);
    }

    // Everything else comes from the routing table.
    match input.routing.action_for(input.intent) {
        Some(action) => decision(action.clone(), None),
        None => decision(Action::LlmReply, None),
    }
}

fn decision(action: Action, escalation: Option<EscalationReason>) -> PolicyDecision {
    PolicyDecision {
        action,
        escalation,
        menu_hint: false,
    }
}

fn sentiment_cooldown_passed(
    last_escalation: Option<&str>,
    cooldown_minutes: i64,
    now: DateTime<Utc>,
) -> bool {
    match last_escalation.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
        Some(last) => (now - last.with_timezone(&Utc)).num_minutes() >= cooldown_minutes,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RouteEntry;

    fn routing() -> RoutingTable {
        let mut table = RoutingTable::default();
        table.intents.insert(
            "rates".to_string(),
            RouteEntry {
                action: Action::LlmReply,
                description: String::new(),
            },
        );
        table.intents.insert(
            "booking".to_string(),
            RouteEntry {
                action: Action::Workflow {
                    workflow_id: "booking".to_string(),
                },
                description: String::new(),
            },
        );
        table.intents.insert(
            "greeting".to_string(),
            RouteEntry {
                action: Action::StaticReply,
                description: String::new(),
            },
        );
        table
    }

    fn input<'a>(intent: &'a str, counters: &'a Counters, routing: &'a RoutingTable) -> PolicyInput<'a> {
        PolicyInput {
            intent,
            confidence: 0.9,
            counters,
            is_first_contact: false,
            copilot: false,
            auto_approve_intents: &[],
            routing,
            sentiment_cooldown_minutes: 30,
            now: Utc::now(),
        }
    }

    #[test]
    fn emergencies_always_escalate() {
        let routing = routing();
        let counters = Counters::default();
        let d = route(&input("emergency_medical", &counters, &routing));
        assert_eq!(d.action, Action::Escalate);
        assert_eq!(d.escalation, Some(EscalationReason::Emergency));
    }

    #[test]
    fn third_identical_attempt_escalates() {
        let routing = routing();
        // repeat_count 1 = 2nd attempt: normal routing still applies.
        let counters = Counters {
            repeat_count: 1,
            ..Default::default()
        };
        let d = route(&input("rates", &counters, &routing));
        assert_eq!(d.action, Action::LlmReply);

        // repeat_count 2 = 3rd attempt: escalate.
        let counters = Counters {
            repeat_count: 2,
            ..Default::default()
        };
        let d = route(&input("rates", &counters, &routing));
        assert_eq!(d.action, Action::Escalate);
        assert_eq!(d.escalation, Some(EscalationReason::Repeat));
    }

    #[test]
    fn third_negative_turn_escalates_once_per_cooldown() {
        let routing = routing();
        let counters = Counters {
            consecutive_negative_count: 3,
            ..Default::default()
        };
        let d = route(&input("rates", &counters, &routing));
        assert_eq!(d.escalation, Some(EscalationReason::Sentiment));

        // Same counters but a recent escalation: cooldown suppresses.
        let counters = Counters {
            consecutive_negative_count: 3,
            last_sentiment_escalation_at: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        };
        let d = route(&input("rates", &counters, &routing));
        assert_eq!(d.escalation, None);
        assert_eq!(d.action, Action::LlmReply);
    }

    #[test]
    fn first_contact_greeting_gets_menu_hint() {
        let routing = routing();
        let counters = Counters::default();
        let mut i = input("greeting", &counters, &routing);
        i.is_first_contact = true;
        let d = route(&i);
        assert_eq!(d.action, Action::StaticReply);
        assert!(d.menu_hint);

        // Returning guest: plain static reply, no menu.
        let i = input("greeting", &counters, &routing);
        let d = route(&i);
        assert!(!d.menu_hint);
    }

    #[test]
    fn copilot_queues_unless_auto_approved() {
        let routing = routing();
        let counters = Counters::default();
        let auto = vec!["greeting".to_string()];

        let mut i = input("rates", &counters, &routing);
        i.copilot = true;
        i.auto_approve_intents = &auto;
        assert_eq!(route(&i).action, Action::StaffReview);

        let mut i = input("greeting", &counters, &routing);
        i.copilot = true;
        i.auto_approve_intents = &auto;
        assert_eq!(route(&i).action, Action::StaticReply);
    }

    #[test]
    fn unknown_intent_gets_static_reply() {
        let routing = routing();
        let counters = Counters::default();
        assert_eq!(
            route(&input("unknown", &counters, &routing)).action,
            Action::StaticReply
        );
    }

    #[test]
    fn unrouted_intent_defaults_to_llm_reply() {
        let routing = routing();
        let counters = Counters::default();
        assert_eq!(
            route(&input("attractions", &counters, &routing)).action,
            Action::LlmReply
        );
    }
}
