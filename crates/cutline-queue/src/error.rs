//! Queue error types.

use thiserror::Error;

use cutline_models::{JobStatus, TransitionError, ValidationError};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job is not in a status that allows the operation.
    #[error("Job {job_id} is {status}")]
    Conflict { job_id: String, status: JobStatus },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Corrupt job record {job_id}: {message}")]
    CorruptRecord { job_id: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn not_found(job_id: impl ToString) -> Self {
        Self::JobNotFound(job_id.to_string())
    }

    pub fn conflict(job_id: impl ToString, status: JobStatus) -> Self {
        Self::Conflict {
            job_id: job_id.to_string(),
            status,
        }
    }

    pub fn corrupt(job_id: impl ToString, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            job_id: job_id.to_string(),
            message: message.into(),
        }
    }

    /// Convert a rejected in-memory transition.
    pub fn from_transition(job_id: impl ToString, err: TransitionError) -> Self {
        Self::conflict(job_id, err.from)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, QueueError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::JobNotFound(_))
    }
}
