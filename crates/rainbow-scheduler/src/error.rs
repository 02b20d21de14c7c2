use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Invalid fire time: {reason}")]
    InvalidFireAt { reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
