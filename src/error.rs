//! Orchestrator error types.
//!
//! Errors are categorized by how the orchestrator reacts to them:
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | **Transient** | `Throttled` | Retried silently by the poller |
//! | **Auth** | `AccessDenied` | Refresh credentials (bounded), then surface |
//! | **Terminal remote** | `Validation`, `InternalServer`, `Service`, `JobNotFound` | Abort polling, job fails |
//! | **Local orchestration** | `Disposed`, `StopFailed`, `Timeout`, `NoActiveJob` | Surfaced as their own outcome |
//! | **Storage / config** | `Io`, `Json`, `Config` | Surfaced to the caller |

use thiserror::Error;

/// Errors that can occur while orchestrating a transformation job.
///
/// Remote-client implementations map their transport failures onto the
/// remote variants; everything else is produced by the orchestrator itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransformError {
    // ── Transient ────────────────────────────────────────────────────
    /// Request was throttled by the remote service.
    #[error("Request throttled: {0}")]
    Throttled(String),

    // ── Auth ─────────────────────────────────────────────────────────
    /// Credentials are missing, expired or lack permission.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    // ── Terminal remote ──────────────────────────────────────────────
    /// The remote service rejected the request.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The remote service failed internally.
    #[error("Internal server error: {0}")]
    InternalServer(String),

    /// Job not found on the remote service.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Any other remote failure.
    #[error("Service error: {0}")]
    Service(String),

    // ── Local orchestration ──────────────────────────────────────────
    /// The owning session was torn down while work was in flight.
    #[error("Orchestrator session disposed")]
    Disposed,

    /// The remote service did not acknowledge a stop request.
    #[error("Failed to stop job {0}")]
    StopFailed(String),

    /// Polling exceeded its maximum duration.
    #[error("Timed out polling job {0}")]
    Timeout(String),

    /// An operation needed an active job but none exists.
    #[error("No active transformation job")]
    NoActiveJob,

    // ── Storage / config ─────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransformError {
    /// Returns `true` if the poller should retry without surfacing the error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    /// Returns `true` if refreshing credentials might fix the error.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Returns `true` if starting a fresh job could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::InternalServer(_) | Self::Timeout(_) | Self::Service(_)
        )
    }
}

/// Result type for orchestrator operations.
pub type TransformResult<T> = Result<T, TransformError>;
