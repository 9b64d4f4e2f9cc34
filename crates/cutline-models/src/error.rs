//! Validation error types for timeline documents.

use thiserror::Error;

/// Result type for document validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A malformed document or clip. Rejected before a job is enqueued and
/// re-checked by the compiler before any plan is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid document: {0}")]
    Document(String),

    #[error("Invalid clip {clip_id}: {message}")]
    Clip { clip_id: String, message: String },

    #[error("Clip {clip_id} overlaps clip {other_clip_id} on track {track_id}")]
    Overlap {
        track_id: String,
        clip_id: String,
        other_clip_id: String,
    },

    #[error("Unresolved source for clip {clip_id}: {reference}")]
    UnresolvedSource { clip_id: String, reference: String },
}

impl ValidationError {
    pub fn document(msg: impl Into<String>) -> Self {
        Self::Document(msg.into())
    }

    pub fn clip(clip_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Clip {
            clip_id: clip_id.into(),
            message: msg.into(),
        }
    }

    /// The offending clip, when the error is attributable to one.
    pub fn clip_id(&self) -> Option<&str> {
        match self {
            ValidationError::Document(_) => None,
            ValidationError::Clip { clip_id, .. }
            | ValidationError::Overlap { clip_id, .. }
            | ValidationError::UnresolvedSource { clip_id, .. } => Some(clip_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_id_is_reported() {
        let err = ValidationError::clip("clip-7", "duration must be positive");
        assert_eq!(err.clip_id(), Some("clip-7"));
        assert!(err.to_string().contains("clip-7"));

        let err = ValidationError::document("duration must be positive");
        assert_eq!(err.clip_id(), None);
    }
}
