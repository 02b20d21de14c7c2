use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Topic not found: {name}")]
    TopicNotFound { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;
