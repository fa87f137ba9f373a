use flowq_core::RepositoryError;
use flowq_queue::{ConfigError, QueueError};
use thiserror::Error;

use crate::limiter::LimiterError;

/// Worker startup and dependency errors
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("queue unavailable: {0}")]
    Queue(#[from] QueueError),

    #[error("execution store unavailable: {0}")]
    Repository(#[from] RepositoryError),

    #[error("tenant limiter unavailable: {0}")]
    Limiter(#[from] LimiterError),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
