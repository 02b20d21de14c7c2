use thiserror::Error;

#[derive(Debug, Error)]
pub enum RainbowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid phone number: {0:?}")]
    InvalidPhone(String),

    #[error("Conversation not found: {phone}")]
    ConversationNotFound { phone: String },

    #[error("Workflow error ({workflow}): {reason}")]
    Workflow { workflow: String, reason: String },

    #[error("Knowledge base error: {0}")]
    Knowledge(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request deadline exceeded after {ms}ms")]
    DeadlineExceeded { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RainbowError {
    /// Short error code string for structured logs and admin alerts.
    pub fn code(&self) -> &'static str {
        match self {
            RainbowError::Config(_) => "CONFIG_ERROR",
            RainbowError::InvalidPhone(_) => "INVALID_PHONE",
            RainbowError::ConversationNotFound { .. } => "CONVERSATION_NOT_FOUND",
            RainbowError::Workflow { .. } => "WORKFLOW_ERROR",
            RainbowError::Knowledge(_) => "KNOWLEDGE_ERROR",
            RainbowError::Provider(_) => "PROVIDER_ERROR",
            RainbowError::Database(_) => "DATABASE_ERROR",
            RainbowError::Channel { .. } => "CHANNEL_ERROR",
            RainbowError::Serialization(_) => "SERIALIZATION_ERROR",
            RainbowError::Io(_) => "IO_ERROR",
            RainbowError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            RainbowError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RainbowError>;
