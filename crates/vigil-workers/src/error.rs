use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("worker is not running: {0}")]
    NotRunning(String),

    #[error("worker limit reached ({limit} concurrent)")]
    LimitReached { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
