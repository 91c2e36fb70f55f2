//! Job identity and remote status types.
//!
//! The remote status machine, as observed by the poller:
//!
//! ```text
//!   Created ──→ Started ──→ Preparing ──→ Prepared ──→ Planning ──→ Planned
//!                                                                     │
//!          ┌──────────────────────────────────────────────────────────┘
//!          ▼
//!   Transforming ⇄ Paused ──→ Completed | PartiallyCompleted
//!          │
//!          ├──→ Failed
//!          └──→ Stopping ──→ Stopped
//! ```
//!
//! **Invariants:**
//! - Statuses are only ever taken from remote observations. The client
//!   never fabricates one; a local stop request is tracked separately.
//! - A plan can only be fetched once the status is in [`PLAN_AVAILABLE`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a remote transformation job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a remote transformation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Started,
    Preparing,
    Prepared,
    Planning,
    Planned,
    Transforming,
    /// Waiting on a human-in-the-loop decision.
    Paused,
    PartiallyCompleted,
    Completed,
    Failed,
    Stopping,
    Stopped,
    /// Status the remote service reported that this client does not know.
    #[serde(other)]
    Unknown,
}

/// Statuses for which the remote service has a transformation plan.
pub const PLAN_AVAILABLE: &[JobStatus] = &[
    JobStatus::Planned,
    JobStatus::Transforming,
    JobStatus::Paused,
    JobStatus::PartiallyCompleted,
    JobStatus::Completed,
];

/// Terminal statuses that produced (possibly partial) results.
pub const TERMINAL_SUCCESS: &[JobStatus] = &[JobStatus::Completed, JobStatus::PartiallyCompleted];

/// Terminal statuses that produced no results.
pub const TERMINAL_FAILURE: &[JobStatus] = &[JobStatus::Failed, JobStatus::Stopped];

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.is_success() || TERMINAL_FAILURE.contains(self)
    }

    /// Check if the job finished with results.
    pub fn is_success(&self) -> bool {
        TERMINAL_SUCCESS.contains(self)
    }

    /// Check if a transformation plan can be fetched for this status.
    pub fn has_plan(&self) -> bool {
        PLAN_AVAILABLE.contains(self)
    }

    /// Check if the job is still running its initial build of the uploaded project.
    pub fn is_initial_build(&self) -> bool {
        matches!(
            self,
            JobStatus::Created | JobStatus::Started | JobStatus::Preparing
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Created => "CREATED",
            JobStatus::Started => "STARTED",
            JobStatus::Preparing => "PREPARING",
            JobStatus::Prepared => "PREPARED",
            JobStatus::Planning => "PLANNING",
            JobStatus::Planned => "PLANNED",
            JobStatus::Transforming => "TRANSFORMING",
            JobStatus::Paused => "PAUSED",
            JobStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Stopping => "STOPPING",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Unknown => "UNKNOWN",
        };
        f.pad(s)
    }
}

/// A snapshot of a remote job as returned by a status fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    /// Human-readable explanation, usually only set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobDetails {
    pub fn new(job_id: JobId, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            creation_time: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_creation_time(mut self, time: DateTime<Utc>) -> Self {
        self.creation_time = Some(time);
        self
    }
}
