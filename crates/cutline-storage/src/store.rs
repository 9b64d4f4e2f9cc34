//! Object store abstraction and key layout.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cutline_models::JobId;

use crate::client::{R2Client, R2Config};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalObjectStore;

/// Content type of rendered artifacts.
pub const RENDER_CONTENT_TYPE: &str = "video/mp4";

/// Durable object storage for source uploads and rendered artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()>;

    /// Download `key` into a local file. Missing objects yield
    /// [`StorageError::NotFound`].
    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()>;

    /// Delete `key`. Deleting a missing object succeeds.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Fetchable URL for `key`, when the store exposes one.
    fn public_url(&self, key: &str) -> Option<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Deterministic artifact key for a job's rendered output.
pub fn render_output_key(job_id: &JobId) -> String {
    format!("renders/{}/output.mp4", job_id)
}

/// Reject keys that could escape a key namespace.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Which object store backend to connect to.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// S3-compatible bucket (Cloudflare R2, MinIO, AWS)
    S3(R2Config),
    /// Directory on the local filesystem
    Local { root: std::path::PathBuf },
}

impl StorageConfig {
    /// Read `STORAGE_BACKEND` (`s3` or `local`, default `s3`).
    pub fn from_env() -> StorageResult<Self> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "s3".to_string());
        match backend.to_ascii_lowercase().as_str() {
            "s3" | "r2" => Ok(Self::S3(R2Config::from_env()?)),
            "local" => Ok(Self::Local {
                root: std::env::var("LOCAL_STORAGE_ROOT")
                    .unwrap_or_else(|_| "/tmp/cutline-storage".to_string())
                    .into(),
            }),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND {}",
                other
            ))),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::S3(_) => "s3",
            Self::Local { .. } => "local",
        }
    }

    /// Build the configured store.
    pub async fn connect(self) -> StorageResult<Arc<dyn ObjectStore>> {
        Ok(match self {
            Self::S3(config) => Arc::new(R2Client::new(config).await?),
            Self::Local { root } => Arc::new(LocalObjectStore::new(root).await?),
        })
    }
}
