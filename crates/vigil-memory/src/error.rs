use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("text not found in section {section}")]
    TextNotFound { section: String },

    #[error("core memory size limit exceeded: {size} > {limit} bytes")]
    SizeLimitExceeded { size: usize, limit: usize },

    #[error("fact not found: {0}")]
    FactNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vigil_core::VigilError> for MemoryError {
    fn from(e: vigil_core::VigilError) -> Self {
        match e {
            vigil_core::VigilError::Io(io) => MemoryError::Io(io),
            other => MemoryError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
