//! Typed views of the staff-tunable JSON documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rainbow_classifier::{IntentSettings, IntentSpec};
use rainbow_core::Action;
use rainbow_providers::ProviderDescriptor;
use rainbow_workflows::LocalizedText;

/// `settings.json` — providers, tier settings, escalation knobs, copilot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub schema_version: u32,
    /// Provider descriptors, priority-ordered at selection time.
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    #[serde(default)]
    pub intent: IntentSettings,
    /// Intents that bypass the copilot approval queue.
    #[serde(default)]
    pub auto_approve_intents: Vec<String>,
    /// Staff numbers receiving escalations and admin alerts.
    #[serde(default)]
    pub staff_phones: Vec<String>,
    #[serde(default)]
    pub copilot: CopilotSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopilotSettings {
    /// Global copilot mode; per-conversation overrides win.
    #[serde(default)]
    pub enabled: bool,
}

/// One entry of `routing.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(flatten)]
    pub action: Action,
    /// One-line description — doubles as the T4 taxonomy line.
    #[serde(default)]
    pub description: String,
}

/// `routing.json` — intent → action table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub intents: BTreeMap<String, RouteEntry>,
}

impl RoutingTable {
    pub fn action_for(&self, intent: &str) -> Option<&Action> {
        self.intents.get(intent).map(|e| &e.action)
    }

    /// Taxonomy for the T4 prompt: every routed intent with its description.
    pub fn taxonomy(&self) -> Vec<IntentSpec> {
        self.intents
            .iter()
            .map(|(name, entry)| IntentSpec {
                name: name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }
}

/// `knowledge.json` — static reply templates by intent × language.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticReplies {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub replies: BTreeMap<String, LocalizedText>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_entry_parses_action_and_description() {
        let raw = r#"{
            "schema_version": 1,
            "intents": {
                "greeting": {"action": "static_reply", "description": "guest says hi"},
                "booking": {"action": "workflow", "workflow_id": "booking"},
                "rates": {"action": "llm_reply"}
            }
        }"#;
        let table: RoutingTable = serde_json::from_str(raw).unwrap();
        assert_eq!(table.action_for("greeting"), Some(&Action::StaticReply));
        assert_eq!(
            table.action_for("booking"),
            Some(&Action::Workflow {
                workflow_id: "booking".to_string()
            })
        );
        let taxonomy = table.taxonomy();
        assert_eq!(taxonomy.len(), 3);
        assert!(taxonomy
            .iter()
            .any(|s| s.name == "greeting" && s.description == "guest says hi"));
    }

    #[test]
    fn settings_round_trip_is_schema_stable() {
        let raw = r#"{
            "schema_version": 2,
            "staff_phones": ["+60123456789"],
            "auto_approve_intents": ["greeting", "thanks"],
            "copilot": {"enabled": true}
        }"#;
        let settings: Settings = serde_json::from_str(raw).unwrap();
        assert!(settings.copilot.enabled);
        assert_eq!(settings.auto_approve_intents.len(), 2);

        let back = serde_json::to_string(&settings).unwrap();
        let again: Settings = serde_json::from_str(&back).unwrap();
        assert_eq!(again.schema_version, 2);
        assert_eq!(again.staff_phones, settings.staff_phones);
    }
}
