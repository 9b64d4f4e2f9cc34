//! The scheduler loop: pop, admit, execute.
//!
//! Any number of schedulers, in one process or many, may drain the same
//! queue. Each pops a job id, asks the admission store for a slot, and either
//! runs the job or puts it back at the head of the queue.
//!
//! A requeued job keeps its place relative to jobs submitted after it, but a
//! job that was already behind it can start first: while scheduler 1 holds
//! job A between a denied acquire and the push back to the front, scheduler 2
//! may pop job B and win a slot freed in the meantime.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use cutline_models::{JobId, RenderJob};
use cutline_queue::{AdmissionStore, JobQueue, JobStore, LeaseToken, QueueError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::RenderExecutor;
use crate::heartbeat::Heartbeat;
use crate::metrics;

/// Timing knobs for one scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub heartbeat_interval: Duration,
    pub admission_backoff: Duration,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for SchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            admission_backoff: config.admission_backoff,
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Why a drain pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue is empty.
    Empty,
    /// The head job was denied a slot and requeued.
    Denied,
    /// The store failed; retry after the backoff.
    StoreError,
    /// The scheduler is stopping.
    Stopped,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    admission: Arc<dyn AdmissionStore>,
    executor: RenderExecutor,
    config: SchedulerConfig,
    wake: Notify,
    stopping: AtomicBool,
    leases_held: AtomicUsize,
    tasks: Mutex<JoinSet<()>>,
}

/// One scheduler instance with an explicit start/stop lifecycle.
pub struct Scheduler {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        admission: Arc<dyn AdmissionStore>,
        executor: RenderExecutor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                queue,
                admission,
                executor,
                config,
                wake: Notify::new(),
                stopping: AtomicBool::new(false),
                leases_held: AtomicUsize::new(0),
                tasks: Mutex::new(JoinSet::new()),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Spawn the loop. Calling `start` on a running scheduler does nothing.
    pub async fn start(&self) {
        let mut handle = self.loop_handle.lock().await;
        if handle.is_some() {
            return;
        }
        self.inner.stopping.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move { inner.run_loop().await }));
        info!("Scheduler started");
    }

    /// Wake the loop, e.g. after a submission or a freed slot.
    pub fn notify(&self) {
        self.inner.wake.notify_one();
    }

    /// One drain pass without the loop.
    pub async fn run_once(&self) -> DrainOutcome {
        self.inner.drain().await
    }

    /// Jobs this scheduler is executing.
    pub fn in_flight(&self) -> usize {
        self.inner.leases_held.load(Ordering::SeqCst)
    }

    /// Wait for every launched job to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        while let Some(result) = tasks.join_next().await {
            log_join(result);
        }
    }

    /// Stop admitting and wait up to the shutdown timeout for running jobs.
    ///
    /// Jobs still running at the deadline are aborted. Their leases expire
    /// and the reconciler fails them later.
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }

        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        let remaining = tasks.len();
        if remaining > 0 {
            info!(jobs = remaining, "Waiting for running jobs");
        }

        let drained = tokio::time::timeout(self.inner.config.shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(jobs = tasks.len(), "Shutdown timeout reached; aborting running jobs");
            tasks.shutdown().await;
        }
        info!("Scheduler stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Job task panicked: {}", e);
        }
    }
}

impl Inner {
    async fn run_loop(self: Arc<Self>) {
        loop {
            let outcome = self.drain().await;
            if outcome == DrainOutcome::Stopped || self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let delay = match outcome {
                DrainOutcome::Denied | DrainOutcome::StoreError => self.config.admission_backoff,
                _ => self.config.poll_interval,
            };

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            self.reap().await;
        }
        debug!("Scheduler loop exited");
    }

    /// Collect finished job tasks.
    async fn reap(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            log_join(result);
        }
    }

    /// Admit jobs until the queue is empty or the head is denied.
    async fn drain(self: &Arc<Self>) -> DrainOutcome {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return DrainOutcome::Stopped;
            }

            let id = match self.queue.pop_front().await {
                Ok(Some(id)) => id,
                Ok(None) => return DrainOutcome::Empty,
                Err(e) => {
                    warn!("Queue pop failed: {}", e);
                    return DrainOutcome::StoreError;
                }
            };

            match self.admission.acquire().await {
                Ok(Some(token)) => self.launch(id, token).await,
                Ok(None) => {
                    metrics::record_admission_denied();
                    debug!(job_id = %id, "{}; requeueing at head", WorkerError::AdmissionDenied);
                    self.requeue(&id).await;
                    return DrainOutcome::Denied;
                }
                Err(e) => {
                    warn!(job_id = %id, "Lease acquire failed: {}", e);
                    self.requeue(&id).await;
                    return DrainOutcome::StoreError;
                }
            }
        }
    }

    async fn requeue(&self, id: &JobId) {
        if let Err(e) = self.queue.push_front(id).await {
            // The id is out of the queue and the job is still pending.
            error!(job_id = %id, "Failed to requeue job: {}", e);
        }
    }

    /// Mark the job processing and hand it to the executor.
    async fn launch(self: &Arc<Self>, id: JobId, token: LeaseToken) {
        let heartbeat = Heartbeat::start(
            Arc::clone(&self.admission),
            token.clone(),
            self.config.heartbeat_interval,
            id.clone(),
        );

        let job = match self.jobs.mark_processing(&id, token.as_str()).await {
            Ok(job) => job,
            Err(e) => {
                match &e {
                    QueueError::Conflict { status, .. } => {
                        info!(job_id = %id, status = %status, "Skipping job no longer pending")
                    }
                    QueueError::JobNotFound(_) => warn!(job_id = %id, "Skipping unknown job"),
                    _ => error!(job_id = %id, "Failed to claim job: {}", e),
                }
                heartbeat.stop().await;
                self.release(&id, &token).await;
                return;
            }
        };

        let held = self.leases_held.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_leases_held(held);
        metrics::record_job_started();
        info!(job_id = %id, lease = %token, "Job admitted");

        let inner = Arc::clone(self);
        self.tasks.lock().await.spawn(async move {
            let result = inner.execute_isolated(job).await;
            inner.finish(&id, result).await;

            if heartbeat.is_lost() {
                warn!(job_id = %id, "Job ran past its admission lease");
            }
            heartbeat.stop().await;
            inner.release(&id, &token).await;

            let held = inner.leases_held.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::set_leases_held(held);
            inner.wake.notify_one();
        });
    }

    /// Run the executor in a task of its own so that a panic comes back as
    /// an error and the job is still failed, its heartbeat stopped and its
    /// lease released.
    async fn execute_isolated(self: &Arc<Self>, job: RenderJob) -> WorkerResult<RenderJob> {
        let inner = Arc::clone(self);
        // Aborting the outer task drops the set, which aborts the executor.
        let mut task = JoinSet::new();
        task.spawn(async move { inner.executor.execute(job).await });

        match task.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(e)) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!("Render task panicked: {}", message);
                Err(WorkerError::Aborted(format!("panicked: {}", message)))
            }
            Some(Err(e)) => Err(WorkerError::Aborted(e.to_string())),
            None => Err(WorkerError::Aborted("render task was not started".to_string())),
        }
    }

    /// Record the executor's outcome. Failures never reach the loop.
    async fn finish(&self, id: &JobId, result: WorkerResult<RenderJob>) {
        match result {
            Ok(_) => metrics::record_job_completed(),
            Err(e) => {
                metrics::record_job_failed(e.kind());
                if let Err(store_err) = self.jobs.fail(id, &e.job_error_text()).await {
                    error!(job_id = %id, "Failed to record job failure ({}): {}", e, store_err);
                }
            }
        }
    }

    async fn release(&self, id: &JobId, token: &LeaseToken) {
        if let Err(e) = self.admission.release(token).await {
            warn!(job_id = %id, lease = %token, "Lease release failed, waiting for expiry: {}", e);
        }
    }
}
