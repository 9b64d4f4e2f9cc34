//! Periodic sweep for processing jobs whose executor is gone.
//!
//! Lease expiry frees a crashed executor's slot but leaves its job record in
//! `processing`. The sweep fails such jobs once they are older than the
//! maximum processing time and their lease is no longer live. Jobs are never
//! requeued.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use cutline_models::RenderJob;
use cutline_queue::{AdmissionStore, JobStore, QueueResult};

use crate::metrics;

/// Error recorded on jobs failed by the sweep.
pub const STALE_REASON: &str = "stale: executor lost its admission lease";

pub struct Reconciler {
    jobs: Arc<dyn JobStore>,
    admission: Arc<dyn AdmissionStore>,
    max_processing: Duration,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        admission: Arc<dyn AdmissionStore>,
        max_processing: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            jobs,
            admission,
            max_processing,
            interval,
        }
    }

    /// Fail every stuck job. Returns how many were failed.
    pub async fn sweep(&self) -> QueueResult<usize> {
        let mut failed = 0;
        for job in self.jobs.list_processing().await? {
            if !self.is_stuck(&job).await? {
                continue;
            }
            match self.jobs.fail(&job.id, STALE_REASON).await {
                Ok(_) => {
                    failed += 1;
                    metrics::record_job_reconciled();
                    warn!(
                        job_id = %job.id,
                        started_at = ?job.started_at,
                        "Failed stuck processing job"
                    );
                }
                // Finished between the listing and now.
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!(job_id = %job.id, "Stuck job resolved itself: {}", e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    async fn is_stuck(&self, job: &RenderJob) -> QueueResult<bool> {
        let started = job.started_at.unwrap_or(job.updated_at);
        let age = (Utc::now() - started).to_std().unwrap_or(Duration::ZERO);
        if age < self.max_processing {
            return Ok(false);
        }
        match &job.lease_token {
            Some(token) => Ok(!self.admission.is_live(token).await?),
            None => Ok(true),
        }
    }

    /// Sweep every interval until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            max_processing_secs = self.max_processing.as_secs(),
            "Reconciler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            match self.sweep().await {
                Ok(0) => {}
                Ok(n) => info!(jobs = n, "Reconciliation sweep failed stuck jobs"),
                Err(e) => warn!("Reconciliation sweep failed: {}", e),
            }
        }
        info!("Reconciler stopped");
    }
}
