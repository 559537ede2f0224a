use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("projection store error: {0}")]
    Store(#[from] vigil_projections::ProjectionError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
