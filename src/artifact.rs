//! Downloaded result archives and their summaries.
//!
//! Both caches are append-only for the lifetime of the store and keyed by
//! [`JobId`]. Downloads are single-flight per job: a second request for a
//! job whose archive is still downloading returns
//! [`DownloadOutcome::InFlight`], while downloads for different jobs run
//! concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::client::RemoteJobClient;
use crate::error::TransformResult;
use crate::job::JobId;
use crate::plan::HilArtifact;

/// Human-readable summary of the changes a transformation made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationSummary {
    /// Markdown body.
    pub content: String,
}

impl TransformationSummary {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Reads the summary out of a downloaded archive.
pub trait ArchiveInspector: Send + Sync {
    fn summary(&self, archive: &Path) -> TransformResult<TransformationSummary>;
}

/// Result of a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The archive was fetched from the remote service.
    Downloaded(PathBuf),
    /// A previously downloaded archive was reused.
    Cached(PathBuf),
    /// Another request for the same job is still downloading.
    InFlight,
}

impl DownloadOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Downloaded(path) | DownloadOutcome::Cached(path) => Some(path),
            DownloadOutcome::InFlight => None,
        }
    }
}

/// Removes a job from the in-flight set when the download ends, on every path.
struct InFlightGuard<'a> {
    set: &'a Mutex<FxHashSet<JobId>>,
    job_id: JobId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.job_id);
    }
}

/// Download cache for result archives and HIL artifacts.
pub struct ArtifactStore {
    dir: PathBuf,
    inspector: Option<Arc<dyn ArchiveInspector>>,
    archives: Mutex<FxHashMap<JobId, PathBuf>>,
    summaries: Mutex<FxHashMap<JobId, TransformationSummary>>,
    in_flight: Mutex<FxHashSet<JobId>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inspector: None,
            archives: Mutex::new(FxHashMap::default()),
            summaries: Mutex::new(FxHashMap::default()),
            in_flight: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn ArchiveInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summary(&self, job_id: &JobId) -> Option<TransformationSummary> {
        self.summaries.lock().get(job_id).cloned()
    }

    pub fn cached_archive(&self, job_id: &JobId) -> Option<PathBuf> {
        self.archives.lock().get(job_id).cloned()
    }

    pub fn is_downloading(&self, job_id: &JobId) -> bool {
        self.in_flight.lock().contains(job_id)
    }

    fn begin(&self, job_id: &JobId) -> Option<InFlightGuard<'_>> {
        if !self.in_flight.lock().insert(job_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            job_id: job_id.clone(),
        })
    }

    /// Fetch the result archive of a finished job, reusing a cached copy
    /// while its file still exists.
    pub async fn download(
        &self,
        client: &dyn RemoteJobClient,
        job_id: &JobId,
    ) -> TransformResult<DownloadOutcome> {
        let Some(_guard) = self.begin(job_id) else {
            tracing::debug!(job_id = %job_id, "download already in flight");
            return Ok(DownloadOutcome::InFlight);
        };

        if let Some(path) = self.cached_archive(job_id) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tracing::debug!(job_id = %job_id, path = %path.display(), "reusing downloaded archive");
                if self.summary(job_id).is_none() {
                    self.inspect(job_id, &path);
                }
                return Ok(DownloadOutcome::Cached(path));
            }
            tracing::info!(job_id = %job_id, path = %path.display(), "cached archive is gone, downloading again");
        }

        tracing::info!(job_id = %job_id, "downloading result archive");
        let chunks = client.download_result_archive(job_id, None).await?;
        let path = self.dir.join(format!("{}.zip", file_stem(job_id.as_str())));
        let size = write_chunks(&path, chunks).await?;
        tracing::info!(job_id = %job_id, path = %path.display(), size, "result archive downloaded");

        self.archives.lock().insert(job_id.clone(), path.clone());
        self.inspect(job_id, &path);
        Ok(DownloadOutcome::Downloaded(path))
    }

    /// Fetch the artifact a paused step is waiting on.
    pub async fn download_hil_artifact(
        &self,
        client: &dyn RemoteJobClient,
        artifact: &HilArtifact,
    ) -> TransformResult<PathBuf> {
        let chunks = client
            .download_result_archive(&artifact.job_id, Some(&artifact.download_artifact()))
            .await?;
        let path = self.dir.join(format!(
            "{}-{}.zip",
            file_stem(artifact.job_id.as_str()),
            file_stem(&artifact.artifact_id)
        ));
        let size = write_chunks(&path, chunks).await?;
        tracing::info!(
            job_id = %artifact.job_id,
            artifact_id = %artifact.artifact_id,
            artifact_type = %artifact.artifact_type,
            size,
            "hil artifact downloaded"
        );
        Ok(path)
    }

    fn inspect(&self, job_id: &JobId, path: &Path) {
        let Some(inspector) = &self.inspector else {
            return;
        };
        match inspector.summary(path) {
            Ok(summary) => {
                self.summaries.lock().insert(job_id.clone(), summary);
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, path = %path.display(), error = %err, "unable to read summary from archive");
            }
        }
    }
}

/// Remote ids become file names; anything but ASCII alphanumerics, `-` and
/// `_` is replaced so a name can never leave the artifact directory.
fn file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "_".to_string() } else { stem }
}

/// Write downloaded chunks to `path` through a temporary file.
async fn write_chunks(path: &Path, chunks: Vec<Vec<u8>>) -> TransformResult<usize> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = chunks.concat();
    let tmp_path = path.with_extension("zip.part");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(bytes.len())
}
