//! Fire-and-forget notifications to the host UI.
//!
//! Three notification families are never conflated:
//!
//! | Family | Notifications |
//! |--------|---------------|
//! | **Terminal** | `Completed`, `PartiallyCompleted`, `Failed`, `InitialBuildFailed`, `MissingDependencies`, `ZipTooLarge`, `Aborted` |
//! | **Action needed** | `ActionNeeded` |
//! | **Stopped** | `TransformationStopped` |
//!
//! Everything else (`Stopping`, `StopFailed`, resume outcomes, invalid
//! project) is informational and independent of job results.

use crate::job::{JobId, JobStatus};
use crate::machine::JobCompletedResult;
use crate::plan::{HilArtifact, TransformationPlan};
use crate::session::JavaVersion;

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Completed {
        job_id: JobId,
    },
    PartiallyCompleted {
        job_id: JobId,
        target_version: JavaVersion,
    },
    Failed {
        reason: String,
        retryable: bool,
    },
    InitialBuildFailed {
        reason: String,
    },
    MissingDependencies,
    ZipTooLarge,
    /// The job never started.
    Aborted,
    /// A paused job needs user input.
    ActionNeeded {
        artifact: HilArtifact,
    },
    TransformationStopped,
    /// A stop request was sent.
    Stopping,
    /// The remote service did not acknowledge a stop request.
    StopFailed,
    /// A job persisted as ongoing finished while the host was closed.
    AlreadyFinished {
        job_id: JobId,
        status: JobStatus,
    },
    /// A job persisted as ongoing is still running and is being tracked again.
    JobOngoing {
        job_id: JobId,
    },
    /// The remote service reported a status this client does not recognize on resume.
    UnknownStatusOnResume,
    UnableToResume {
        reason: String,
    },
    InvalidProject {
        reason: String,
    },
}

impl Notification {
    /// The terminal notification for a completion result.
    ///
    /// Returns `None` for results that have no user-facing terminal
    /// notification: a paused job (handled by `ActionNeeded`) and a
    /// disposed manager.
    pub fn for_result(result: &JobCompletedResult) -> Option<Self> {
        let notification = match result {
            JobCompletedResult::UnableToCreateJob { reason, retryable } => Notification::Failed {
                reason: reason.clone(),
                retryable: *retryable,
            },
            JobCompletedResult::JobFailed { reason } => Notification::Failed {
                reason: reason.clone(),
                retryable: false,
            },
            JobCompletedResult::JobFailedInitialBuild { reason } => {
                Notification::InitialBuildFailed {
                    reason: reason.clone(),
                }
            }
            JobCompletedResult::JobPartiallySucceeded {
                job_id,
                target_version,
            } => Notification::PartiallyCompleted {
                job_id: job_id.clone(),
                target_version: *target_version,
            },
            JobCompletedResult::JobCompletedSuccessfully { job_id } => Notification::Completed {
                job_id: job_id.clone(),
            },
            JobCompletedResult::JobAbortedBeforeStarting => Notification::Aborted,
            JobCompletedResult::JobAbortedMissingDependencies => Notification::MissingDependencies,
            JobCompletedResult::JobAbortedZipTooLarge => Notification::ZipTooLarge,
            JobCompletedResult::Stopped => Notification::TransformationStopped,
            JobCompletedResult::JobPaused { .. } | JobCompletedResult::ManagerDisposed => {
                return None;
            }
        };
        Some(notification)
    }
}

/// Receives orchestrator events. Implementations must not block; every
/// method has an empty default body.
pub trait TransformListener: Send + Sync {
    /// A new `(status, plan)` pair was observed.
    fn on_state_change(
        &self,
        _previous: JobStatus,
        _current: JobStatus,
        _plan: Option<&TransformationPlan>,
    ) {
    }

    /// A job attempt ended.
    fn on_completion(&self, _result: &JobCompletedResult) {}

    /// A job paused for user input and its artifact is available.
    fn on_paused(&self, _artifact: &HilArtifact) {}

    /// A job ended because the user stopped it.
    fn on_stopped(&self) {}

    /// A persisted job is being picked up again.
    fn on_resuming(&self) {}

    fn notify(&self, _notification: Notification) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TransformListener for NoopListener {}
