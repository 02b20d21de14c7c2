//! The workflow executor: one guest turn in, one reply out.
//!
//! Precedence while a workflow is active: cancel → correction → expected
//! step input. The caller (the turn pipeline) detects cancel keywords with
//! the classifier and passes the verdict in; everything else is decided
//! here from the cursor and the definitions.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use rainbow_core::{Lang, WorkflowCursor};

use crate::effects::EffectCall;
use crate::types::{LocalizedText, StepDef, WorkflowDef, WorkflowError, WorkflowSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Moved to the next step; the reply is that step's prompt.
    Advanced,
    /// Reached a terminal step; the workflow is over.
    Completed,
    /// Guest backed out; gracious exit sent.
    Cancelled,
    /// A previously-filled slot was updated instead of advancing.
    Corrected { slot: String },
    /// The answer failed the step's validation; step unchanged.
    ValidationFailed,
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub reply: String,
    /// Updated cursor; `None` when the workflow ended this turn.
    pub cursor: Option<WorkflowCursor>,
    /// Side effects to run after the reply is queued.
    pub effects: Vec<EffectCall>,
    pub outcome: TurnOutcome,
}

pub struct WorkflowExecutor {
    workflows: std::collections::BTreeMap<String, WorkflowDef>,
}

impl WorkflowExecutor {
    /// Build from a loaded `workflows.json`, validating every definition.
    pub fn from_set(set: WorkflowSet) -> Result<Self, WorkflowError> {
        for (id, def) in &set.workflows {
            def.validate(id)?;
        }
        Ok(Self {
            workflows: set.workflows,
        })
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowDef> {
        self.workflows.get(id)
    }

    /// Whether an active workflow must consume every turn until completion.
    pub fn is_emergency(&self, id: &str) -> bool {
        self.workflows.get(id).is_some_and(|w| w.emergency)
    }

    /// Begin a workflow: returns the first prompt and a cursor (unless the
    /// start step is already terminal).
    pub fn start(
        &self,
        workflow_id: &str,
        phone: &str,
        lang: Lang,
        now: &str,
    ) -> Result<TurnResult, WorkflowError> {
        let def = self
            .workflows
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::NotFound {
                id: workflow_id.to_string(),
            })?;
        let step = def
            .steps
            .get(&def.start)
            .ok_or_else(|| WorkflowError::StepNotFound {
                workflow: workflow_id.to_string(),
                step: def.start.clone(),
            })?;

        let cursor = WorkflowCursor::start(workflow_id, def.start.clone(), now);
        let effects = effect_calls(step, phone, &cursor);
        info!(workflow = workflow_id, phone, "workflow started");

        Ok(TurnResult {
            reply: step.prompt.get(lang).to_string(),
            cursor: if step.is_terminal() {
                None
            } else {
                Some(cursor)
            },
            effects,
            outcome: if step.is_terminal() {
                TurnOutcome::Completed
            } else {
                TurnOutcome::Advanced
            },
        })
    }

    /// Consume one guest turn for an active workflow.
    pub fn handle_turn(
        &self,
        mut cursor: WorkflowCursor,
        phone: &str,
        text: &str,
        lang: Lang,
        cancel_detected: bool,
        now: &str,
    ) -> Result<TurnResult, WorkflowError> {
        let def =
            self.workflows
                .get(&cursor.workflow_id)
                .ok_or_else(|| WorkflowError::NotFound {
                    id: cursor.workflow_id.clone(),
                })?;

        // Cancel always exits in one reply, emergency or not.
        if cancel_detected {
            info!(workflow = %cursor.workflow_id, phone, "workflow cancelled by guest");
            return Ok(TurnResult {
                reply: CANCEL_REPLY.get(lang).to_string(),
                cursor: None,
                effects: Vec::new(),
                outcome: TurnOutcome::Cancelled,
            });
        }

        // Corrections update an earlier slot instead of advancing.
        if let Some((slot, value)) = detect_correction(text, &cursor) {
            cursor.slots.insert(slot.clone(), value.clone());
            cursor.last_slot = Some(slot.clone());
            cursor.updated_at = now.to_string();
            debug!(workflow = %cursor.workflow_id, slot = %slot, value = %value, "slot corrected");
            let reply = correction_reply(lang, &slot, &value);
            return Ok(TurnResult {
                reply,
                cursor: Some(cursor),
                effects: Vec::new(),
                outcome: TurnOutcome::Corrected { slot },
            });
        }

        let step = def
            .steps
            .get(&cursor.step_id)
            .ok_or_else(|| WorkflowError::StepNotFound {
                workflow: cursor.workflow_id.clone(),
                step: cursor.step_id.clone(),
            })?;

        // Treat the message as the expected input for the current step.
        let mut filled: Option<String> = None;
        if let Some(slot_name) = &step.slot {
            let value = match &step.validation {
                Some(rule) => {
                    let re = Regex::new(&rule.pattern).map_err(|e| {
                        WorkflowError::InvalidPattern {
                            pattern: rule.pattern.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    match re.captures(text.trim()) {
                        Some(caps) => caps
                            .get(1)
                            .map(|m| m.as_str().to_string())
                            .unwrap_or_else(|| text.trim().to_string()),
                        None => {
                            return Ok(TurnResult {
                                reply: rule.message.get(lang).to_string(),
                                cursor: Some(cursor),
                                effects: Vec::new(),
                                outcome: TurnOutcome::ValidationFailed,
                            })
                        }
                    }
                }
                None => text.trim().to_string(),
            };
            cursor.slots.insert(slot_name.clone(), value.clone());
            cursor.last_slot = Some(slot_name.clone());
            filled = Some(value);
        }

        match step.resolve_next(filled.as_deref()).map(str::to_string) {
            Some(next_id) => {
                let next = def
                    .steps
                    .get(&next_id)
                    .ok_or_else(|| WorkflowError::StepNotFound {
                        workflow: cursor.workflow_id.clone(),
                        step: next_id.clone(),
                    })?;
                cursor.step_id = next_id;
                cursor.updated_at = now.to_string();
                let effects = effect_calls(next, phone, &cursor);
                let reply = next.prompt.get(lang).to_string();

                if next.is_terminal() {
                    info!(workflow = %cursor.workflow_id, phone, "workflow completed");
                    Ok(TurnResult {
                        reply,
                        cursor: None,
                        effects,
                        outcome: TurnOutcome::Completed,
                    })
                } else {
                    Ok(TurnResult {
                        reply,
                        cursor: Some(cursor),
                        effects,
                        outcome: TurnOutcome::Advanced,
                    })
                }
            }
            // Load-time validation keeps slot steps pointed somewhere; a
            // parked terminal cursor still completes cleanly.
            None => Ok(TurnResult {
                reply: COMPLETION_REPLY.get(lang).to_string(),
                cursor: None,
                effects: Vec::new(),
                outcome: TurnOutcome::Completed,
            }),
        }
    }

    /// Message for the idle-timeout auto-cancel (the sweeper sends it).
    pub fn timeout_reply(lang: Lang) -> String {
        TIMEOUT_REPLY.get(lang).to_string()
    }
}

fn effect_calls(step: &StepDef, phone: &str, cursor: &WorkflowCursor) -> Vec<EffectCall> {
    step.effects
        .iter()
        .map(|name| EffectCall {
            name: name.clone(),
            phone: phone.to_string(),
            workflow_id: cursor.workflow_id.clone(),
            step_id: cursor.step_id.clone(),
            slots: cursor.slots.clone(),
        })
        .collect()
}

static CORRECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(actually|i meant|sorry,? i meant|not .+ but|bukan|sebenarnya|silap)\b|其实|改成|换成")
        .expect("static correction pattern")
});

static EXPLICIT_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:i meant|actually|change (?:it|that) to|改成|换成)\s+(.+)$")
        .expect("static correction value pattern")
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static number pattern"));

/// Detect "actually 3 guests not 2"-style corrections against the filled
/// slots. Numeric corrections pick the filled slot holding a different
/// number; free-text corrections land on the most recently filled slot.
fn detect_correction(text: &str, cursor: &WorkflowCursor) -> Option<(String, String)> {
    if cursor.slots.is_empty() || !CORRECTION_RE.is_match(text) {
        return None;
    }

    if let Some(new_num) = NUMBER_RE.find(text).map(|m| m.as_str().to_string()) {
        let target = cursor
            .slots
            .iter()
            .find(|(_, v)| NUMBER_RE.is_match(v) && **v != new_num)
            .map(|(k, _)| k.clone());
        if let Some(slot) = target {
            return Some((slot, new_num));
        }
    }

    if let Some(caps) = EXPLICIT_VALUE_RE.captures(text) {
        let value = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split(" not ")
            .next()
            .unwrap_or_default()
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_string();
        if !value.is_empty() {
            if let Some(slot) = cursor.last_slot.clone() {
                return Some((slot, value));
            }
        }
    }

    None
}

static CANCEL_REPLY: Lazy<LocalizedText> = Lazy::new(|| LocalizedText {
    en: "No problem, I've cancelled that. Just message me whenever you'd like to start again!"
        .to_string(),
    ms: Some(
        "Tiada masalah, saya telah batalkan. Hubungi saya bila-bila masa untuk mula semula!"
            .to_string(),
    ),
    zh: Some("好的，已为您取消。随时找我重新开始！".to_string()),
});

static COMPLETION_REPLY: Lazy<LocalizedText> = Lazy::new(|| LocalizedText {
    en: "All done! Is there anything else I can help you with?".to_string(),
    ms: Some("Selesai! Ada apa-apa lagi yang boleh saya bantu?".to_string()),
    zh: Some("都办好了！还有什么可以帮您的吗？".to_string()),
});

static TIMEOUT_REPLY: Lazy<LocalizedText> = Lazy::new(|| LocalizedText {
    en: "Are you still there? I've closed this request for now — message me anytime to continue."
        .to_string(),
    ms: Some(
        "Anda masih di sana? Saya tutup permintaan ini buat masa ini — hubungi saya bila-bila masa untuk sambung."
            .to_string(),
    ),
    zh: Some("您还在吗？这个请求暂时关闭了——随时发消息继续。".to_string()),
});

fn correction_reply(lang: Lang, slot: &str, value: &str) -> String {
    let label = slot.replace('_', " ");
    match lang {
        Lang::Ms => format!("Baik, saya telah tukar {} kepada {}.", label, value),
        Lang::Zh => format!("好的，已将{}改为{}。", label, value),
        Lang::En | Lang::Unknown => format!("Got it, I've updated {} to {}.", label, value),
    }
}
