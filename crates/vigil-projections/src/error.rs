use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("projection not found: {0}")]
    NotFound(String),

    #[error("dependency would create a cycle: {observer} -> {subject}")]
    DependencyCycle { observer: String, subject: String },

    #[error("dependency chain too deep (max {max}): {observer} -> {subject}")]
    ChainTooDeep {
        observer: String,
        subject: String,
        max: usize,
    },

    #[error("rearm requires a recurrence: {0}")]
    NotRecurring(String),

    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
