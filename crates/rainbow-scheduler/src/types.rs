use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// How often a task repeats after a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatRule {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for RepeatRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepeatRule::None => "none",
            RepeatRule::Daily => "daily",
            RepeatRule::Weekly => "weekly",
            RepeatRule::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RepeatRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(RepeatRule::None),
            "daily" => Ok(RepeatRule::Daily),
            "weekly" => Ok(RepeatRule::Weekly),
            "monthly" => Ok(RepeatRule::Monthly),
            other => Err(format!("unknown repeat rule: {other}")),
        }
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for fire_at (or a retry window).
    Pending,
    /// Dispatched successfully.
    Sent,
    /// Cancelled by staff before dispatch.
    Cancelled,
    /// Retries exhausted; admin alerted.
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Sent => "sent",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "sent" => Ok(TaskStatus::Sent),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persisted scheduled-message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Recipient conversation phone (digits only).
    pub phone: String,
    /// Message text or template reference.
    pub payload: String,
    /// ISO-8601 UTC instant; always in the future for pending tasks.
    pub fire_at: String,
    pub repeat: RepeatRule,
    /// Staff member or subsystem that created the task.
    pub creator: String,
    pub status: TaskStatus,
    /// Dispatch attempts so far (retries on failure).
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Next fire time for a repeat rule, anchored on the *previous* fire_at so
/// repeated sends never drift.
pub fn next_occurrence(fire_at: DateTime<Utc>, rule: RepeatRule) -> Option<DateTime<Utc>> {
    match rule {
        RepeatRule::None => None,
        RepeatRule::Daily => Some(fire_at + chrono::Duration::days(1)),
        RepeatRule::Weekly => Some(fire_at + chrono::Duration::days(7)),
        RepeatRule::Monthly => fire_at.checked_add_months(Months::new(1)),
    }
}
