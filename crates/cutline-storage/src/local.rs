//! Filesystem-backed object store for single-node deployments and tests.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ObjectStore};

/// Stores each object as a file under `root`, keyed by relative path.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<()> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        debug!("Stored {} at {}", path.display(), target.display());
        Ok(())
    }

    async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()> {
        let source = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::copy(&source, path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::download_failed(e.to_string())),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        let metadata = tokio::fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::config_error(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path().join("bucket")).await.unwrap();

        let src = dir.path().join("in.mp4");
        tokio::fs::write(&src, b"frames").await.unwrap();

        store.upload_file(&src, "renders/j1/output.mp4", "video/mp4").await.unwrap();
        assert!(store.exists("renders/j1/output.mp4").await.unwrap());

        let dst = dir.path().join("out/copy.mp4");
        store.download_file("renders/j1/output.mp4", &dst).await.unwrap();
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"frames");

        store.delete_object("renders/j1/output.mp4").await.unwrap();
        assert!(!store.exists("renders/j1/output.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        store.delete_object("uploads/gone.mp4").await.unwrap();
        store.delete_object("uploads/gone.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        let err = store
            .download_file("uploads/none.mp4", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();

        assert!(matches!(
            store.exists("../outside").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
