use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rainbow_core::Lang;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {id}")]
    NotFound { id: String },

    #[error("Step not found: {workflow}/{step}")]
    StepNotFound { workflow: String, step: String },

    #[error("Invalid workflow definition ({workflow}): {reason}")]
    InvalidDefinition { workflow: String, reason: String },

    #[error("Side effect failed ({name}): {reason}")]
    EffectFailed { name: String, reason: String },

    #[error("Invalid validation pattern ({pattern}): {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A prompt or message in the three supported languages. English is the
/// required base; missing translations fall back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub en: String,
    #[serde(default)]
    pub ms: Option<String>,
    #[serde(default)]
    pub zh: Option<String>,
}

impl LocalizedText {
    pub fn en_only(text: impl Into<String>) -> Self {
        Self {
            en: text.into(),
            ms: None,
            zh: None,
        }
    }

    pub fn get(&self, lang: Lang) -> &str {
        match lang {
            Lang::Ms => self.ms.as_deref().unwrap_or(&self.en),
            Lang::Zh => self.zh.as_deref().unwrap_or(&self.en),
            Lang::En | Lang::Unknown => &self.en,
        }
    }
}

/// Input validation for a step's slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Regex the guest's answer must match. A capture group 1, when
    /// present, becomes the stored slot value.
    pub pattern: String,
    /// Sent verbatim when validation fails; the step does not advance.
    pub message: LocalizedText,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Outbound message for this step. Load-time validation rejects filler
    /// preambles: every prompt must end with a question or closing statement.
    pub prompt: LocalizedText,
    /// Slot filled by the guest's answer; `None` for message-only steps.
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
    /// Branch table: slot value → next step id, with `"_"` as the default.
    #[serde(default)]
    pub branches: BTreeMap<String, String>,
    /// Unconditional next step (used when `branches` is empty or misses).
    #[serde(default)]
    pub next: Option<String>,
    /// Side-effect names run after this step's reply is queued.
    #[serde(default)]
    pub effects: Vec<String>,
}

impl StepDef {
    /// Resolve the follow-up step for a filled value (branch → default
    /// branch → `next`). `None` means the workflow completes here.
    pub fn resolve_next(&self, value: Option<&str>) -> Option<&str> {
        if let Some(v) = value {
            if let Some(target) = self.branches.get(v) {
                return Some(target);
            }
        }
        if let Some(target) = self.branches.get("_") {
            return Some(target);
        }
        self.next.as_deref()
    }

    /// Terminal steps carry a closing statement and nothing else.
    pub fn is_terminal(&self) -> bool {
        self.slot.is_none() && self.branches.is_empty() && self.next.is_none()
    }
}

/// One named workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub start: String,
    /// Emergency workflows consume every turn until completion; the
    /// classifier's output is advisory only while one is active.
    #[serde(default)]
    pub emergency: bool,
    pub steps: BTreeMap<String, StepDef>,
}

impl WorkflowDef {
    /// Structural validation, run once at load time.
    pub fn validate(&self, id: &str) -> Result<(), WorkflowError> {
        let invalid = |reason: String| WorkflowError::InvalidDefinition {
            workflow: id.to_string(),
            reason,
        };

        if !self.steps.contains_key(&self.start) {
            return Err(invalid(format!("start step '{}' does not exist", self.start)));
        }

        for (step_id, step) in &self.steps {
            for target in step.branches.values().chain(step.next.iter()) {
                if !self.steps.contains_key(target) {
                    return Err(invalid(format!(
                        "step '{}' points at missing step '{}'",
                        step_id, target
                    )));
                }
            }
            if step.slot.is_some() && step.branches.is_empty() && step.next.is_none() {
                return Err(invalid(format!(
                    "step '{}' gathers a slot but leads nowhere",
                    step_id
                )));
            }
            for text in [
                Some(step.prompt.en.as_str()),
                step.prompt.ms.as_deref(),
                step.prompt.zh.as_deref(),
            ]
            .into_iter()
            .flatten()
            {
                if is_filler_prompt(text) {
                    return Err(invalid(format!(
                        "step '{}' prompt is a filler preamble without a question or closing statement",
                        step_id
                    )));
                }
            }
            if let Some(rule) = &step.validation {
                regex::Regex::new(&rule.pattern).map_err(|e| WorkflowError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// Every outbound step message must end with a concrete question or a
/// closing statement — never a bare "I'll help you with that".
fn is_filler_prompt(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    let last = trimmed.chars().last().unwrap_or(' ');
    !matches!(last, '?' | '!' | '.' | ')' | '？' | '！' | '。')
}

/// Root of `workflows.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSet {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowDef>,
}
