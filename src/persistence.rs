//! Durable session record.
//!
//! The record holds just enough to pick a job up again after the host
//! restarts: the last job id, whether it was still running, and the
//! session context that produced it. It is rewritten on every change of
//! the ongoing flag and read once at startup.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TransformResult;
use crate::job::JobId;
use crate::session::{JavaVersion, SessionContext};

/// Current record schema version.
pub const CURRENT_RECORD_VERSION: u32 = 1;

fn current_version() -> u32 {
    CURRENT_RECORD_VERSION
}

/// Serialized form of a [`SessionContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContext {
    pub project: PathBuf,
    pub config_file: PathBuf,
    pub source_version: JavaVersion,
    pub target_version: JavaVersion,
}

impl From<&SessionContext> for PersistedContext {
    fn from(ctx: &SessionContext) -> Self {
        Self {
            project: ctx.project.clone(),
            config_file: ctx.config_file.clone(),
            source_version: ctx.source_version,
            target_version: ctx.target_version,
        }
    }
}

impl From<PersistedContext> for SessionContext {
    fn from(p: PersistedContext) -> Self {
        SessionContext::new(p.project, p.config_file, p.source_version, p.target_version)
    }
}

/// The durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Schema version for migrations
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub last_job_id: Option<JobId>,
    /// A job was mid-flight when the record was last written.
    #[serde(default)]
    pub ongoing: bool,
    #[serde(default)]
    pub session_context: Option<PersistedContext>,
}

impl Default for PersistedRecord {
    fn default() -> Self {
        Self {
            version: CURRENT_RECORD_VERSION,
            last_job_id: None,
            ongoing: false,
            session_context: None,
        }
    }
}

impl PersistedRecord {
    /// Record for a job that is running.
    pub fn ongoing(job_id: JobId, context: &SessionContext) -> Self {
        Self {
            last_job_id: Some(job_id),
            ongoing: true,
            session_context: Some(context.into()),
            ..Self::default()
        }
    }

    /// Same record with the ongoing flag cleared.
    pub fn finished(mut self) -> Self {
        self.ongoing = false;
        self
    }

    pub fn context(&self) -> Option<SessionContext> {
        self.session_context.clone().map(SessionContext::from)
    }
}

/// Load and save the durable record.
pub trait SessionPersistence: Send + Sync {
    /// Read the record. A record that was never written loads as the default.
    fn load(&self) -> TransformResult<PersistedRecord>;

    fn save(&self, record: &PersistedRecord) -> TransformResult<()>;
}

/// Record stored as a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for JsonFilePersistence {
    fn load(&self) -> TransformResult<PersistedRecord> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedRecord::default());
            }
            Err(e) => return Err(e.into()),
        };
        let record: PersistedRecord = serde_json::from_str(&json)?;
        if record.version > CURRENT_RECORD_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                version = record.version,
                "session record written by a newer version"
            );
        }
        Ok(record)
    }

    fn save(&self, record: &PersistedRecord) -> TransformResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())?;
        std::fs::rename(&tmp_path, &self.path)?;
        tracing::debug!(path = %self.path.display(), ongoing = record.ongoing, "session record saved");
        Ok(())
    }
}

/// Record kept in memory, for hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    record: Mutex<PersistedRecord>,
}

impl MemoryPersistence {
    pub fn new(record: PersistedRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn snapshot(&self) -> PersistedRecord {
        self.record.lock().clone()
    }
}

impl SessionPersistence for MemoryPersistence {
    fn load(&self) -> TransformResult<PersistedRecord> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &PersistedRecord) -> TransformResult<()> {
        *self.record.lock() = record.clone();
        Ok(())
    }
}
