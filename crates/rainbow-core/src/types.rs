use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RainbowError;

/// Canonical conversation key — the guest's phone number reduced to digits.
///
/// WhatsApp delivers numbers in wildly different shapes (`+60 12-345 6789`,
/// `60123456789@c.us`); everything that touches a conversation keys on this
/// normalised form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneKey(pub String);

impl PhoneKey {
    /// Normalise any display format to digits. At least 6 digits required.
    pub fn parse(raw: &str) -> Result<Self, RainbowError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 6 {
            return Err(RainbowError::InvalidPhone(raw.to_string()));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported guest languages. `Unknown` covers everything else — callers
/// either translate to English first or fall back to the stored tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    #[default]
    En,
    Ms,
    Zh,
    Unknown,
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lang::En => write!(f, "en"),
            Lang::Ms => write!(f, "ms"),
            Lang::Zh => write!(f, "zh"),
            Lang::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "en" => Ok(Lang::En),
            "ms" => Ok(Lang::Ms),
            "zh" => Ok(Lang::Zh),
            "unknown" => Ok(Lang::Unknown),
            other => Err(format!("unknown language tag: {}", other)),
        }
    }
}

impl Lang {
    /// True for the three languages the assistant replies in natively.
    pub fn is_supported(&self) -> bool {
        matches!(self, Lang::En | Lang::Ms | Lang::Zh)
    }
}

/// Which classifier stage produced an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    T1,
    T2,
    T3,
    T4,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::T1 => write!(f, "T1"),
            Tier::T2 => write!(f, "T2"),
            Tier::T3 => write!(f, "T3"),
            Tier::T4 => write!(f, "T4"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "T1" => Ok(Tier::T1),
            "T2" => Ok(Tier::T2),
            "T3" => Ok(Tier::T3),
            "T4" => Ok(Tier::T4),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// What the router decided to do with a classified message.
///
/// Stored in `routing.json` as `{"action": "...", "workflow_id": "..."}` and
/// matched exhaustively at every decision point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    StaticReply,
    LlmReply,
    Workflow { workflow_id: String },
    Escalate,
    StaffReview,
}

impl Action {
    /// Stable label for message metadata and analytics.
    pub fn label(&self) -> &'static str {
        match self {
            Action::StaticReply => "static_reply",
            Action::LlmReply => "llm_reply",
            Action::Workflow { .. } => "workflow",
            Action::Escalate => "escalate",
            Action::StaffReview => "staff_review",
        }
    }
}

/// Workflow position for a conversation with an active workflow.
///
/// This is a plain value owned by the conversation record; the executor
/// borrows it for one turn and hands it back (or clears it). No back-pointer
/// into the conversation exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCursor {
    pub workflow_id: String,
    pub step_id: String,
    #[serde(default)]
    pub slots: std::collections::BTreeMap<String, String>,
    /// The slot most recently filled — corrections without an explicit
    /// target land here.
    #[serde(default)]
    pub last_slot: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

impl WorkflowCursor {
    pub fn start(workflow_id: impl Into<String>, step_id: impl Into<String>, now: &str) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            slots: Default::default(),
            last_slot: None,
            started_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

/// Per-conversation operating mode. Copilot queues assistant replies for a
/// human; autopilot sends them straight out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Autopilot,
    Copilot,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::Autopilot => write!(f, "autopilot"),
            ResponseMode::Copilot => write!(f, "copilot"),
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "autopilot" => Ok(ResponseMode::Autopilot),
            "copilot" => Ok(ResponseMode::Copilot),
            other => Err(format!("unknown response mode: {}", other)),
        }
    }
}

/// Operational alert for hostel staff/admin channels (not guests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAlert {
    /// Stable machine code, e.g. "kb_unhealthy", "scheduler_task_failed".
    pub code: String,
    pub message: String,
    pub at: String,
}

impl AdminAlert {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
