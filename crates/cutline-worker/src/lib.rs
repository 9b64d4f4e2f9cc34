//! Render worker.
//!
//! This crate provides:
//! - The scheduler loop with admission control and lease heartbeats
//! - The render executor: staging, compilation, encoding, publishing
//! - Artifact upload and cleanup
//! - A reconciliation sweep for jobs whose executor died
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod logging;
pub mod metrics;
pub mod publisher;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod staging;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{encode_progress, EncodeBackend, FfmpegBackend, RenderExecutor};
pub use heartbeat::Heartbeat;
pub use logging::JobLogger;
pub use publisher::ArtifactPublisher;
pub use reconciler::{Reconciler, STALE_REASON};
pub use retry::{retry_async, FailureTracker, RetryPolicy};
pub use scheduler::{DrainOutcome, Scheduler, SchedulerConfig};
pub use staging::{StagedJob, Stager};
