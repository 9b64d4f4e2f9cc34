//! Per-job structured log lines.

use std::time::Instant;

use tracing::{error, info, warn, Span};

use cutline_models::JobId;

/// Lifecycle logger for one render job.
///
/// Every line carries the job id, the current stage and the time since the
/// logger was created, so a job's lines can be pulled out of a shared stream.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    stage: &'static str,
    started: Instant,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.clone(),
            stage: "render",
            started: Instant::now(),
        }
    }

    /// Same job, different stage label. Elapsed time keeps running.
    pub fn stage(&self, stage: &'static str) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn stage_name(&self) -> &'static str {
        self.stage
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = self.stage,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, progress: u8, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = self.stage,
            progress,
            elapsed_ms = self.elapsed_ms() as u64,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = self.stage,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            stage = self.stage,
            elapsed_ms = self.elapsed_ms() as u64,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            stage = self.stage,
            elapsed_ms = self.elapsed_ms() as u64,
            "Job completed: {}", message
        );
    }

    /// Span for the executor task.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_keeps_job() {
        let id = JobId::from_string("job-1");
        let logger = JobLogger::new(&id);
        let encode = logger.stage("encode");

        assert_eq!(logger.stage_name(), "render");
        assert_eq!(encode.stage_name(), "encode");
        assert_eq!(encode.job_id(), &id);
    }
}
