//! Artifact upload and post-job cleanup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use cutline_models::{ArtifactRef, RenderJob};
use cutline_queue::JobStore;
use cutline_storage::{render_output_key, ObjectStore, RENDER_CONTENT_TYPE};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::retry::{retry_async, RetryPolicy};
use crate::staging::{remove_dir, remove_file, StagedJob};

/// Progress reported once the upload is confirmed.
const UPLOADED_PROGRESS: u8 = 95;

/// Publishes encoded output and cleans up after a job.
///
/// Sources are deleted only after the upload is confirmed. Every cleanup
/// step tolerates having already run.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    retry: RetryPolicy,
    failed_output_retention: Duration,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            jobs,
            retry: RetryPolicy::new("artifact_upload"),
            failed_output_retention: Duration::from_secs(600),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How long an encoded output is kept on disk after its upload failed.
    pub fn with_failed_output_retention(mut self, retention: Duration) -> Self {
        self.failed_output_retention = retention;
        self
    }

    /// Upload the output, record it on the job and clean up.
    pub async fn publish(&self, job: &RenderJob, staged: &StagedJob) -> WorkerResult<RenderJob> {
        let key = render_output_key(&job.id);
        let started = Instant::now();

        let uploaded = retry_async(&self.retry, || {
            self.store
                .upload_file(&staged.output, &key, RENDER_CONTENT_TYPE)
        })
        .await;

        if let Err(e) = uploaded {
            self.retain_output(job, staged).await;
            return Err(WorkerError::publish(format!("{}: {}", key, e)));
        }
        metrics::record_upload_duration(started.elapsed().as_secs_f64());

        if let Err(e) = self.jobs.update_progress(&job.id, UPLOADED_PROGRESS).await {
            warn!(job_id = %job.id, "Failed to record upload progress: {}", e);
        }

        let artifact = ArtifactRef::new(&key).with_url(self.store.public_url(&key));
        let completed = self.jobs.complete(&job.id, &artifact).await?;
        info!(job_id = %job.id, key = %key, "Artifact published");

        self.cleanup_success(job, staged).await;
        Ok(completed)
    }

    /// Remove staging files, then the job's consumed sources.
    ///
    /// Only called once the artifact is durable. Failures are logged and a
    /// source that could not be deleted is noted on the job record.
    pub async fn cleanup_success(&self, job: &RenderJob, staged: &StagedJob) {
        if let Err(e) = remove_dir(&staged.dir).await {
            warn!(job_id = %job.id, "Failed to remove staging dir {:?}: {}", staged.dir, e);
        }

        for source in &job.consumed_sources {
            if let Err(e) = self.store.delete_object(source).await {
                warn!(job_id = %job.id, source = %source, "Failed to delete consumed source: {}", e);
                let note = format!("source cleanup failed for {}", source);
                if let Err(e) = self.jobs.annotate(&job.id, &note).await {
                    warn!(job_id = %job.id, "Failed to annotate job: {}", e);
                }
            }
        }
    }

    /// Local cleanup after a failed job. Sources are left in place so a
    /// resubmission still has its inputs.
    pub async fn cleanup_failure(&self, job: &RenderJob, staged: &StagedJob) {
        if let Err(e) = remove_dir(&staged.dir).await {
            warn!(job_id = %job.id, "Failed to remove staging dir {:?}: {}", staged.dir, e);
        }
    }

    /// Keep the encoded output for a while after a failed upload, remove
    /// everything else now.
    async fn retain_output(&self, job: &RenderJob, staged: &StagedJob) {
        let sources_dir = staged.dir.join("sources");
        if let Err(e) = remove_dir(&sources_dir).await {
            warn!(job_id = %job.id, "Failed to remove staged sources: {}", e);
        }

        warn!(
            job_id = %job.id,
            output = ?staged.output,
            retention_secs = self.failed_output_retention.as_secs(),
            "Upload failed; keeping encoded output for recovery"
        );

        let staged = staged.clone();
        let retention = self.failed_output_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Err(e) = remove_file(&staged.output).await {
                warn!("Failed to remove retained output {:?}: {}", staged.output, e);
            }
            if let Err(e) = remove_dir(&staged.dir).await {
                warn!("Failed to remove staging dir {:?}: {}", staged.dir, e);
            }
        });
    }
}
