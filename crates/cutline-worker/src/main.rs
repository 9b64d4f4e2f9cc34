//! Render worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cutline_media::{check_ffmpeg, check_ffprobe};
use cutline_models::RenderSettings;
use cutline_queue::{
    AdmissionStore, JobQueue, JobStore, RedisAdmissionStore, RedisHandle, RedisJobQueue,
    RedisJobStore, StoreConfig,
};
use cutline_storage::StorageConfig;
use cutline_worker::{
    metrics, ArtifactPublisher, FfmpegBackend, Reconciler, RenderExecutor, Scheduler,
    SchedulerConfig, Stager, WorkerConfig,
};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("cutline=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting cutline-worker");

    let config = WorkerConfig::from_env();
    let settings = RenderSettings::from_env();
    info!(?config, "Worker config");

    check_ffmpeg().context("ffmpeg is required")?;
    check_ffprobe().context("ffprobe is required")?;
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("cannot create work dir {:?}", config.work_dir))?;

    if let Some(addr) = config.metrics_addr {
        metrics::install_exporter(addr)?;
        info!(%addr, "Serving Prometheus metrics");
    }

    let store_config = StoreConfig::from_env();
    let redis = RedisHandle::new(&store_config)?;
    redis.ping().await.context("coordination store unreachable")?;

    let jobs: Arc<dyn JobStore> = Arc::new(RedisJobStore::new(
        redis.clone(),
        store_config.job_retention,
    ));
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis.clone()));
    let admission: Arc<dyn AdmissionStore> = Arc::new(RedisAdmissionStore::new(
        redis,
        config.admission_config(),
    ));

    let storage = StorageConfig::from_env()?;
    info!(backend = storage.backend_name(), "Connecting object store");
    let objects = storage.connect().await?;

    let publisher = ArtifactPublisher::new(Arc::clone(&objects), Arc::clone(&jobs))
        .with_failed_output_retention(config.failed_output_retention);
    let executor = RenderExecutor::new(
        Arc::clone(&jobs),
        Stager::new(objects, &config.work_dir),
        Arc::new(FfmpegBackend::new(config.encode_timeout)),
        publisher,
        settings,
    );

    let scheduler = Scheduler::new(
        Arc::clone(&jobs),
        queue,
        Arc::clone(&admission),
        executor,
        SchedulerConfig::from(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(
        jobs,
        admission,
        config.max_processing,
        config.reconcile_interval,
    );
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_rx));

    scheduler.start().await;
    info!(max_slots = config.max_slots, "Worker ready");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    scheduler.stop().await;
    reconciler_handle.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
