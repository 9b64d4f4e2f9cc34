//! Worker error types.

use thiserror::Error;

use cutline_models::ValidationError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Malformed document or clip.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No slot free. Transient; the job is requeued, never failed.
    #[error("Admission denied")]
    AdmissionDenied,

    /// A source could not be fetched.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// The encoding backend failed.
    #[error("Encode failed: {message}")]
    Encode {
        message: String,
        diagnostic: Option<String>,
    },

    /// Upload failed after a successful encode.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The render task panicked or was torn down before returning.
    #[error("Render task aborted: {0}")]
    Aborted(String),

    #[error("Queue error: {0}")]
    Queue(#[from] cutline_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] cutline_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] cutline_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Wrap a backend failure, keeping its diagnostic output.
    pub fn encode(err: cutline_media::MediaError) -> Self {
        Self::Encode {
            diagnostic: err.diagnostic().map(str::to_string),
            message: err.to_string(),
        }
    }

    /// Text recorded on the failed job.
    ///
    /// Encode failures record the backend diagnostic verbatim. That diagnostic
    /// is only the tail of the encoder's stderr (the last
    /// [`cutline_media::MAX_DIAGNOSTIC_LINES`] lines), not its complete output.
    pub fn job_error_text(&self) -> String {
        match self {
            WorkerError::Encode {
                diagnostic: Some(diagnostic),
                ..
            } => diagnostic.clone(),
            other => other.to_string(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Validation(_) => "validation",
            WorkerError::AdmissionDenied => "admission_denied",
            WorkerError::Fetch(_) => "fetch",
            WorkerError::Encode { .. } => "encode",
            WorkerError::Publish(_) => "publish",
            WorkerError::Aborted(_) => "aborted",
            WorkerError::Queue(_) => "queue",
            WorkerError::Storage(_) => "storage",
            WorkerError::Media(_) => "media",
            WorkerError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_media::MediaError;

    #[test]
    fn test_encode_error_keeps_diagnostic_verbatim() {
        let diagnostic = "[Parsed_overlay_3 @ 0x55] Invalid argument\nError reinitializing filters!";
        let err = WorkerError::encode(MediaError::ffmpeg_failed(
            "exit status 1",
            Some(diagnostic.to_string()),
            Some(1),
        ));

        assert_eq!(err.job_error_text(), diagnostic);
        assert_eq!(err.kind(), "encode");
    }

    #[test]
    fn test_encode_error_without_diagnostic_uses_message() {
        let err = WorkerError::encode(MediaError::Timeout(30));
        assert!(err.job_error_text().contains("timed out"));
    }

    #[test]
    fn test_aborted_task_text() {
        let err = WorkerError::Aborted("task panicked".to_string());
        assert_eq!(err.kind(), "aborted");
        assert_eq!(err.job_error_text(), "Render task aborted: task panicked");
    }

    #[test]
    fn test_fetch_error_text() {
        let err = WorkerError::fetch("uploads/a.mp4: not found");
        assert_eq!(err.job_error_text(), "Fetch failed: uploads/a.mp4: not found");
    }
}
