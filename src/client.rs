//! Remote job client and local packaging traits.
//!
//! The [`RemoteJobClient`] trait is the orchestrator's only view of the
//! transformation service:
//!
//! ```text
//!   start_job() ──→ get_job() ⟲ get_plan() ──→ download_result_archive()
//!                      │
//!                      ├──→ resume_job()   (after a human-in-the-loop pause)
//!                      └──→ cancel_job()
//! ```
//!
//! ## Method table
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `start_job()` | async | yes | `TransformResult<JobId>` |
//! | `get_job()` | async | yes | `TransformResult<JobDetails>` |
//! | `get_plan()` | async | yes | `TransformResult<TransformationPlan>` |
//! | `resume_job()` | async | yes | `TransformResult<JobStatus>` |
//! | `cancel_job()` | async | yes | `TransformResult<bool>` |
//! | `download_result_archive()` | async | yes | `TransformResult<Vec<Vec<u8>>>` |
//! | `refresh_credentials()` | async | provided | `TransformResult<()>` |
//!
//! Implementations map their transport failures onto [`TransformError`]:
//! `Throttled` is retried silently, `AccessDenied` triggers a bounded
//! credential refresh, everything else aborts polling.
//!
//! [`TransformError`]: crate::error::TransformError

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TransformResult;
use crate::job::{JobDetails, JobId, JobStatus};
use crate::plan::{DownloadArtifact, TransformationPlan};
use crate::session::SessionContext;

/// Trait for the remote transformation service.
///
/// # Contract
///
/// - `start_job()` MUST only return once the remote job exists.
/// - `get_plan()` MAY fail for statuses outside the plan-available set.
/// - `cancel_job()` returns `Ok(false)` when the service did not
///   acknowledge the request; that is not the same as the call failing.
/// - `download_result_archive()` with no artifact downloads the final
///   result; with an artifact it downloads that artifact only.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Create a remote job from an uploaded project.
    async fn start_job(&self, request: &StartJobRequest) -> TransformResult<JobId>;

    /// Fetch the current status of a job.
    async fn get_job(&self, job_id: &JobId) -> TransformResult<JobDetails>;

    /// Fetch the current transformation plan of a job.
    async fn get_plan(&self, job_id: &JobId) -> TransformResult<TransformationPlan>;

    /// Resume a job paused for user input.
    async fn resume_job(
        &self,
        job_id: &JobId,
        action: UserActionStatus,
    ) -> TransformResult<JobStatus>;

    /// Request cancellation of a job.
    async fn cancel_job(&self, job_id: &JobId) -> TransformResult<bool>;

    /// Download a result archive as a sequence of byte chunks.
    async fn download_result_archive(
        &self,
        job_id: &JobId,
        artifact: Option<&DownloadArtifact>,
    ) -> TransformResult<Vec<Vec<u8>>>;

    /// Refresh expired credentials.
    ///
    /// Default implementation does nothing, for clients whose credentials
    /// never expire.
    async fn refresh_credentials(&self) -> TransformResult<()> {
        Ok(())
    }
}

/// Action the user took on a paused job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserActionStatus {
    /// The user supplied the requested input.
    Completed,
    /// The user declined; the service continues without it.
    Rejected,
}

/// A packaged project ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    /// Path of the zipped project.
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Everything needed to create a remote job.
#[derive(Debug, Clone)]
pub struct StartJobRequest {
    pub context: SessionContext,
    pub payload: UploadPayload,
}

/// Outcome of building the project's dependencies locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildResult {
    Success,
    Failure,
    Cancelled,
}

/// Failures while packaging the project, before any remote job exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackagingError {
    #[error("failed to zip the project: {0}")]
    ZipCreationFailed(String),

    #[error("project archive exceeds the upload size limit")]
    ZipTooLarge,

    #[error("project dependencies are missing")]
    MissingDependencies,

    #[error("packaging was cancelled")]
    Cancelled,
}

/// Builds and zips the project before upload.
#[async_trait]
pub trait ProjectPackager: Send + Sync {
    /// Resolve the project's dependencies with a local build.
    async fn build_dependencies(&self, context: &SessionContext) -> BuildResult;

    /// Zip the project and its dependencies for upload.
    async fn package(&self, context: &SessionContext) -> Result<UploadPayload, PackagingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packaging_error_display() {
        assert_eq!(
            PackagingError::ZipCreationFailed("disk full".into()).to_string(),
            "failed to zip the project: disk full"
        );
        let err: Box<dyn std::error::Error> = Box::new(PackagingError::ZipTooLarge);
        assert_eq!(err.to_string(), "project archive exceeds the upload size limit");
    }

    #[test]
    fn test_user_action_wire_names() {
        assert_eq!(
            serde_json::to_string(&UserActionStatus::Rejected).unwrap(),
            "\"REJECTED\""
        );
    }
}
