//! Application state.

use std::sync::Arc;

use cutline_queue::{
    JobQueue, JobStore, MemoryJobQueue, MemoryJobStore, RedisHandle, RedisJobQueue, RedisJobStore,
    RenderSubmitter, StoreConfig,
};
use cutline_storage::{ObjectStore, StorageConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub submitter: RenderSubmitter,
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    /// Checked by readiness; absent when the API runs without storage access
    pub storage: Option<Arc<dyn ObjectStore>>,
}

impl AppState {
    /// Connect to the coordination store and object store from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let store_config = StoreConfig::from_env();
        let redis = RedisHandle::new(&store_config)?;

        let jobs: Arc<dyn JobStore> = Arc::new(RedisJobStore::new(
            redis.clone(),
            store_config.job_retention,
        ));
        let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis));
        let storage = StorageConfig::from_env()?.connect().await?;

        Ok(Self::from_parts(config, jobs, queue, Some(storage)))
    }

    pub fn from_parts(
        config: ApiConfig,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        storage: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            config,
            submitter: RenderSubmitter::new(Arc::clone(&jobs), Arc::clone(&queue)),
            jobs,
            queue,
            storage,
        }
    }

    /// State on in-process stores, for single-node use and tests.
    pub fn in_memory(config: ApiConfig) -> Self {
        Self::from_parts(
            config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryJobQueue::new()),
            None,
        )
    }
}
