//! Render job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::timeline::TimelineDocument;

/// Error text stored on a job cancelled while pending.
pub const CANCELLED_REASON: &str = "cancelled";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job status. Moves only forward: pending -> processing -> completed|failed,
/// or pending -> failed when cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Durable reference to an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactRef {
    /// Object store key
    pub key: String,
    /// Fetchable URL when the store exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ArtifactRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// A submitted render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderJob {
    /// Unique job ID
    pub id: JobId,

    /// Document snapshot taken at submission
    pub document: TimelineDocument,

    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0-100), non-decreasing while processing
    #[serde(default)]
    pub progress: u8,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure reason, or an operator note on a terminal job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Uploaded output (completed jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ArtifactRef>,

    /// Source uploads deleted after a confirmed successful publish
    #[serde(default)]
    pub consumed_sources: Vec<String>,

    /// Admission lease held while processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<String>,
}

impl RenderJob {
    /// Create a new pending job for a document snapshot.
    pub fn new(document: TimelineDocument) -> Self {
        let now = Utc::now();
        let consumed_sources = document.source_refs();

        Self {
            id: JobId::new(),
            document,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            output: None,
            consumed_sources,
            lease_token: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Start processing the job under an admission lease.
    pub fn start(&mut self, lease_token: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(self.updated_at);
        self.lease_token = Some(lease_token.into());
        Ok(())
    }

    /// Raise progress. Returns false (and changes nothing) unless the job is
    /// processing and the value is higher than the current one.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if self.status != JobStatus::Processing || progress <= self.progress {
            return false;
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        true
    }

    /// Mark job as completed.
    pub fn complete(&mut self, output: ArtifactRef) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        self.progress = 100;
        self.output = Some(output);
        Ok(())
    }

    /// Mark job as failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        self.completed_at = Some(self.updated_at);
        self.error = Some(error.into());
        Ok(())
    }

    /// Cancel a pending job.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Failed,
            });
        }
        self.fail(CANCELLED_REASON)
    }

    /// Attach an operator-visible note to a terminal job.
    pub fn annotate(&mut self, note: impl Into<String>) -> bool {
        if !self.status.is_terminal() {
            return false;
        }
        let note = note.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{}; {}", existing, note),
            None => note,
        });
        self.updated_at = Utc::now();
        true
    }

    /// Caller-facing status snapshot.
    pub fn report(&self, queue_position: Option<usize>) -> JobStatusReport {
        JobStatusReport {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            queue_position: if self.status == JobStatus::Pending {
                queue_position
            } else {
                None
            },
            output_reference: if self.status == JobStatus::Completed {
                self.output.clone()
            } else {
                None
            },
            error: self.error.clone(),
        }
    }
}

/// Status query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    /// Zero-based position in the queue (pending jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_reference: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
