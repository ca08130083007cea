use thiserror::Error;
use uuid::Uuid;

use notify_common::error::AppError;
use notify_common::types::JobState;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Cannot {op} job {id} in state {state}")]
    InvalidTransition {
        id: Uuid,
        state: JobState,
        op: &'static str,
    },

    /// The lease expired and the job was reclaimed or handed to another worker.
    #[error("Lease on job {0} is no longer held")]
    LeaseLost(Uuid),
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(_) | QueueError::Database(_) => {
                AppError::QueueUnavailable(err.to_string())
            }
            QueueError::NotFound(id) => {
                AppError::NotFound(format!("Notification {} not found", id))
            }
            QueueError::InvalidTransition { .. } | QueueError::LeaseLost(_) => {
                AppError::Conflict(err.to_string())
            }
            QueueError::Duplicate(_) => AppError::Internal(err.to_string()),
        }
    }
}
