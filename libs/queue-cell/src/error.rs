use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::QueueStatus;

pub const CONSULTATION_CONFLICT_MESSAGE: &str =
    "another patient is already in consultation with this doctor";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Cannot {action} a queue entry in status {from}")]
    InvalidQueueTransition { from: QueueStatus, action: String },

    #[error("Cannot start consultation: another patient is already in consultation with this doctor")]
    ConcurrentConsultationConflict,

    #[error("Queue entry not found: {0}")]
    EntryNotFound(String),

    #[error("Completing a consultation requires a prescription, title or notes")]
    MissingConsultationOutcome,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl QueueError {
    pub fn entry_not_found(entry_id: Uuid) -> Self {
        QueueError::EntryNotFound(entry_id.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidQueueTransition { .. } | QueueError::ConcurrentConsultationConflict => {
                AppError::Conflict(err.to_string())
            }
            QueueError::EntryNotFound(_) => AppError::NotFound(err.to_string()),
            QueueError::MissingConsultationOutcome | QueueError::ValidationError(_) => {
                AppError::BadRequest(err.to_string())
            }
            QueueError::Storage(_) | QueueError::RedisError(_) | QueueError::SerializationError(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
