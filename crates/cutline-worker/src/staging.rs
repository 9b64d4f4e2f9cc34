//! Input staging: fetch a job's sources into a private directory.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use cutline_media::SourceMedia;
use cutline_models::{JobId, RenderJob};
use cutline_storage::ObjectStore;

use crate::error::{WorkerError, WorkerResult};
use crate::executor::EncodeBackend;

/// Local files for one job.
#[derive(Debug, Clone)]
pub struct StagedJob {
    /// Private staging directory, removed on cleanup
    pub dir: PathBuf,
    /// Staged media keyed by source reference
    pub sources: HashMap<String, SourceMedia>,
    /// Where the encoder writes
    pub output: PathBuf,
}

/// Downloads sources and probes visual ones for their dimensions.
#[derive(Clone)]
pub struct Stager {
    store: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
}

impl Stager {
    pub fn new(store: Arc<dyn ObjectStore>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            work_dir: work_dir.into(),
        }
    }

    /// Directory name unique per call, so retries and concurrent jobs never share files.
    fn job_dir(&self, id: &JobId) -> PathBuf {
        self.work_dir
            .join(format!("{}-{}", id, Uuid::new_v4().simple()))
    }

    /// Stage every source of `job`. On error nothing is left on disk.
    pub async fn stage(&self, job: &RenderJob, backend: &dyn EncodeBackend) -> WorkerResult<StagedJob> {
        let dir = self.job_dir(&job.id);
        let sources_dir = dir.join("sources");
        tokio::fs::create_dir_all(&sources_dir).await?;

        match self.fetch_all(job, &sources_dir, backend).await {
            Ok(sources) => Ok(StagedJob {
                output: dir.join("output.mp4"),
                dir,
                sources,
            }),
            Err(e) => {
                if let Err(cleanup) = remove_dir(&dir).await {
                    warn!(job_id = %job.id, "Failed to remove staging dir {:?}: {}", dir, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn fetch_all(
        &self,
        job: &RenderJob,
        sources_dir: &Path,
        backend: &dyn EncodeBackend,
    ) -> WorkerResult<HashMap<String, SourceMedia>> {
        let visual: HashSet<&str> = job
            .document
            .clips()
            .filter(|(_, _, clip)| clip.kind.is_visual())
            .map(|(_, _, clip)| clip.source.as_str())
            .collect();

        let mut staged = HashMap::new();
        for (index, reference) in job.document.source_refs().into_iter().enumerate() {
            let local = sources_dir.join(local_name(index, &reference));
            self.store
                .download_file(&reference, &local)
                .await
                .map_err(|e| WorkerError::fetch(format!("{}: {}", reference, e)))?;

            let media = if visual.contains(reference.as_str()) {
                let info = backend
                    .probe(&local)
                    .await
                    .map_err(|e| WorkerError::fetch(format!("{}: unreadable media: {}", reference, e)))?;
                SourceMedia::new(&local, info.width, info.height)
            } else {
                SourceMedia::audio(&local)
            };

            debug!(
                job_id = %job.id,
                source = %reference,
                width = media.width,
                height = media.height,
                "Source staged"
            );
            staged.insert(reference, media);
        }
        Ok(staged)
    }
}

/// Local file name for a source: index prefix plus the key's last segment,
/// so the extension survives for format detection.
fn local_name(index: usize, reference: &str) -> String {
    let base = Path::new(reference)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("source");
    format!("{:03}-{}", index, base)
}

/// Remove a directory tree. A missing directory is not an error.
pub async fn remove_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Remove a file. A missing file is not an error.
pub async fn remove_file(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
