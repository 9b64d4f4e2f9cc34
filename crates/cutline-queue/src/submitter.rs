//! Caller-facing operations: submit, status, cancel.

use std::sync::Arc;

use tracing::{info, warn};

use cutline_models::{JobId, JobStatus, JobStatusReport, RenderJob, TimelineDocument};

use crate::error::{QueueError, QueueResult};
use crate::queue::JobQueue;
use crate::store::JobStore;

/// Entry point for callers that submit and track renders.
#[derive(Clone)]
pub struct RenderSubmitter {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl RenderSubmitter {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { jobs, queue }
    }

    /// Validate and enqueue a document snapshot.
    pub async fn submit(&self, document: TimelineDocument) -> QueueResult<JobStatusReport> {
        document.validate()?;

        let job = RenderJob::new(document);
        self.jobs.insert(&job).await?;
        if let Err(e) = self.queue.push_back(&job.id).await {
            // Never leave a pending record that no scheduler will see.
            if let Err(fail_err) = self
                .jobs
                .fail(&job.id, &format!("enqueue failed: {}", e))
                .await
            {
                warn!(job_id = %job.id, "Failed to record enqueue failure: {}", fail_err);
            }
            return Err(e);
        }

        info!(
            job_id = %job.id,
            clips = job.document.clips().count(),
            duration = job.document.duration,
            "Render job submitted"
        );
        Ok(job.report(None))
    }

    /// Current status, with queue position for pending jobs.
    pub async fn status(&self, id: &JobId) -> QueueResult<JobStatusReport> {
        let job = self
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))?;

        let position = if job.status == JobStatus::Pending {
            self.queue.position(id).await?
        } else {
            None
        };
        Ok(job.report(position))
    }

    /// Cancel a pending job. Processing and terminal jobs are left untouched.
    pub async fn cancel(&self, id: &JobId) -> QueueResult<JobStatusReport> {
        let job = self
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))?;
        if job.status != JobStatus::Pending {
            return Err(QueueError::conflict(id, job.status));
        }

        let dequeued = self.queue.remove(id).await?;
        // A scheduler may have popped the id already; the store decides.
        let job = self.jobs.cancel(id).await.inspect_err(|e| {
            if e.is_conflict() {
                warn!(job_id = %id, "Cancel lost race with scheduler");
            }
        })?;

        info!(job_id = %id, dequeued, "Render job cancelled");
        Ok(job.report(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::store::MemoryJobStore;
    use cutline_models::CANCELLED_REASON;

    fn submitter() -> (RenderSubmitter, Arc<MemoryJobStore>, Arc<MemoryJobQueue>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        (
            RenderSubmitter::new(jobs.clone(), queue.clone()),
            jobs,
            queue,
        )
    }

    #[tokio::test]
    async fn test_submit_reports_pending_with_position() {
        let (submitter, _, _) = submitter();
        let first = submitter.submit(TimelineDocument::empty(5.0)).await.unwrap();
        let second = submitter.submit(TimelineDocument::empty(5.0)).await.unwrap();

        assert_eq!(first.status, JobStatus::Pending);
        let status = submitter.status(&second.job_id).await.unwrap();
        assert_eq!(status.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_document() {
        let (submitter, _, queue) = submitter();
        let err = submitter.submit(TimelineDocument::empty(0.0)).await.unwrap_err();

        assert!(matches!(err, QueueError::Validation(_)));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    /// Queue that accepts nothing.
    struct DownQueue;

    #[async_trait::async_trait]
    impl JobQueue for DownQueue {
        async fn push_back(&self, _id: &JobId) -> QueueResult<()> {
            Err(QueueError::connection_failed("connection refused"))
        }
        async fn push_front(&self, _id: &JobId) -> QueueResult<()> {
            Err(QueueError::connection_failed("connection refused"))
        }
        async fn pop_front(&self) -> QueueResult<Option<JobId>> {
            Ok(None)
        }
        async fn remove(&self, _id: &JobId) -> QueueResult<bool> {
            Ok(false)
        }
        async fn position(&self, _id: &JobId) -> QueueResult<Option<usize>> {
            Ok(None)
        }
        async fn len(&self) -> QueueResult<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_fails_the_record() {
        let jobs = Arc::new(MemoryJobStore::new());
        let submitter = RenderSubmitter::new(jobs.clone(), Arc::new(DownQueue));

        let err = submitter.submit(TimelineDocument::empty(5.0)).await.unwrap_err();
        assert!(matches!(err, QueueError::ConnectionFailed(_)));

        let records = jobs.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Failed);
        let error = records[0].error.as_deref().unwrap();
        assert!(error.starts_with("enqueue failed"), "{}", error);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let (submitter, _, queue) = submitter();
        let report = submitter.submit(TimelineDocument::empty(5.0)).await.unwrap();

        let cancelled = submitter.cancel(&report.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_processing_is_conflict() {
        let (submitter, jobs, queue) = submitter();
        let report = submitter.submit(TimelineDocument::empty(5.0)).await.unwrap();
        queue.pop_front().await.unwrap();
        jobs.mark_processing(&report.job_id, "lease").await.unwrap();

        let err = submitter.cancel(&report.job_id).await.unwrap_err();
        assert!(err.is_conflict());
        let status = submitter.status(&report.job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (submitter, _, _) = submitter();
        let err = submitter.status(&JobId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
