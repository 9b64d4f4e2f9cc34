//! Render execution: stage, compile, encode, publish.
//!
//! Progress is reported on one 0-100 scale regardless of backend:
//!
//! | Range  | Stage                          |
//! |--------|--------------------------------|
//! | 0-10   | fetching and probing sources   |
//! | 10-80  | encoding                       |
//! | 80-100 | uploading and recording output |

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

use cutline_media::{
    compile, probe_media, render_command, CompositionPlan, FfmpegProgress, FfmpegRunner,
    MediaInfo, MediaResult,
};
use cutline_models::{JobId, RenderJob, RenderSettings};
use cutline_queue::JobStore;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::publisher::ArtifactPublisher;
use crate::staging::{remove_file, StagedJob, Stager};

pub const STAGED_PROGRESS: u8 = 10;
pub const ENCODED_PROGRESS: u8 = 80;

/// Progress channel depth. Snapshots beyond this are dropped by the runner.
const PROGRESS_BUFFER: usize = 16;

/// Map an encode fraction into the encode sub-range.
pub fn encode_progress(fraction: f64) -> u8 {
    let span = f64::from(ENCODED_PROGRESS - STAGED_PROGRESS);
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    STAGED_PROGRESS + (fraction * span).round() as u8
}

/// The external encoder.
#[async_trait]
pub trait EncodeBackend: Send + Sync {
    /// Inspect a staged source.
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Encode `plan` into `output`, sending progress snapshots on `progress`.
    /// The sender is dropped when encoding ends.
    async fn encode(
        &self,
        plan: &CompositionPlan,
        output: &Path,
        settings: &RenderSettings,
        progress: mpsc::Sender<FfmpegProgress>,
    ) -> MediaResult<()>;
}

/// FFmpeg on the local host.
pub struct FfmpegBackend {
    runner: FfmpegRunner,
}

impl FfmpegBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(timeout),
        }
    }
}

#[async_trait]
impl EncodeBackend for FfmpegBackend {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(path).await
    }

    async fn encode(
        &self,
        plan: &CompositionPlan,
        output: &Path,
        settings: &RenderSettings,
        progress: mpsc::Sender<FfmpegProgress>,
    ) -> MediaResult<()> {
        let cmd = render_command(plan, output, settings);
        self.runner.run_with_progress(&cmd, Some(progress)).await
    }
}

/// Runs one job from staged inputs to a published artifact.
#[derive(Clone)]
pub struct RenderExecutor {
    jobs: Arc<dyn JobStore>,
    stager: Stager,
    backend: Arc<dyn EncodeBackend>,
    publisher: ArtifactPublisher,
    settings: RenderSettings,
}

impl RenderExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        stager: Stager,
        backend: Arc<dyn EncodeBackend>,
        publisher: ArtifactPublisher,
        settings: RenderSettings,
    ) -> Self {
        Self {
            jobs,
            stager,
            backend,
            publisher,
            settings,
        }
    }

    /// Run `job`, which must already be marked processing.
    ///
    /// On success the job is completed in the store. On error the caller
    /// records the failure; local files are already gone except an encoded
    /// output whose upload failed, which is kept for a while.
    pub async fn execute(&self, job: RenderJob) -> WorkerResult<RenderJob> {
        let logger = JobLogger::new(&job.id);
        let span = logger.span();
        self.run(job, logger).instrument(span).await
    }

    async fn run(&self, job: RenderJob, logger: JobLogger) -> WorkerResult<RenderJob> {
        logger.log_start(&format!(
            "{} clips, {} sources, {:.2}s",
            job.document.clips().count(),
            job.consumed_sources.len(),
            job.document.duration
        ));

        let started = Instant::now();
        let staged = match self.stager.stage(&job, self.backend.as_ref()).await {
            Ok(staged) => staged,
            Err(e) => {
                logger.stage("stage").log_error(&e.to_string());
                return Err(e);
            }
        };
        metrics::record_stage_duration(started.elapsed().as_secs_f64());
        self.report(&job.id, STAGED_PROGRESS).await;
        logger
            .stage("stage")
            .log_progress(STAGED_PROGRESS, "Sources staged");

        if let Err(e) = self.encode(&job, &staged, &logger).await {
            let logger = logger.stage("encode");
            logger.log_error(&e.to_string());
            if let Err(cleanup) = remove_file(&staged.output).await {
                logger.log_warning(&format!("failed to delete partial output: {}", cleanup));
            }
            self.publisher.cleanup_failure(&job, &staged).await;
            return Err(e);
        }

        match self.publisher.publish(&job, &staged).await {
            Ok(completed) => {
                logger.log_completion(&format!(
                    "published {}",
                    completed
                        .output
                        .as_ref()
                        .map(|output| output.key.as_str())
                        .unwrap_or_default()
                ));
                Ok(completed)
            }
            Err(e) => {
                logger.stage("publish").log_error(&e.to_string());
                if !matches!(e, WorkerError::Publish(_)) {
                    self.publisher.cleanup_failure(&job, &staged).await;
                }
                Err(e)
            }
        }
    }

    async fn encode(&self, job: &RenderJob, staged: &StagedJob, logger: &JobLogger) -> WorkerResult<()> {
        let plan = compile(&job.document, &staged.sources, &self.settings)?;
        let logger = logger.stage("encode");
        debug!(
            job_id = %job.id,
            inputs = plan.inputs.len(),
            layers = plan.layers.len(),
            blank = plan.is_blank(),
            "Composition plan compiled"
        );

        let (tx, mut rx) = mpsc::channel::<FfmpegProgress>(PROGRESS_BUFFER);
        let total = plan.canvas.duration;
        let started = Instant::now();

        let forward = async {
            let mut last = STAGED_PROGRESS;
            while let Some(snapshot) = rx.recv().await {
                let progress = encode_progress(snapshot.fraction(total));
                if progress > last {
                    last = progress;
                    self.report(&job.id, progress).await;
                    if progress % 10 == 0 {
                        logger.log_progress(progress, "Encoding");
                    }
                }
            }
        };

        let (encoded, ()) = tokio::join!(
            self.backend.encode(&plan, &staged.output, &self.settings, tx),
            forward
        );
        encoded.map_err(WorkerError::encode)?;

        metrics::record_encode_duration(started.elapsed().as_secs_f64());
        self.report(&job.id, ENCODED_PROGRESS).await;
        Ok(())
    }

    /// Progress writes are best effort; a missed update never fails a job.
    async fn report(&self, id: &JobId, progress: u8) {
        if let Err(e) = self.jobs.update_progress(id, progress).await {
            debug!(job_id = %id, progress, "Progress update failed: {}", e);
        }
    }
}
