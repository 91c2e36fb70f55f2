//! Per-job state machine.
//!
//! ```text
//!   Idle ──→ Starting ──→ Running ⇄ Paused
//!                            │
//!                            ├──→ CompletedSuccess
//!                            ├──→ CompletedPartial
//!                            ├──→ Failed
//!                            └──→ Stopped
//!
//!   any ──→ Disposed   (owning session torn down)
//! ```
//!
//! Every externally observable outcome of a migration attempt is one
//! [`JobCompletedResult`] variant. Callers match it exhaustively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{
    BuildResult, PackagingError, ProjectPackager, RemoteJobClient, StartJobRequest,
    UserActionStatus,
};
use crate::error::{TransformError, TransformResult};
use crate::job::{JobDetails, JobId, JobStatus};
use crate::listener::TransformListener;
use crate::plan::{HilArtifact, TransformationPlan};
use crate::poller::{JobPoller, PollOutcome, PollSettings, PollingResult};
use crate::session::{JavaVersion, SessionContext};

/// Statuses that end polling without a failure. `Paused` only ends it once
/// the plan names the artifact the job is waiting on.
pub const SUCCEED_ON: &[JobStatus] = &[
    JobStatus::Completed,
    JobStatus::PartiallyCompleted,
    JobStatus::Paused,
    JobStatus::Stopped,
];

/// Statuses that end polling with a failure.
pub const FAIL_ON: &[JobStatus] = &[JobStatus::Failed, JobStatus::Unknown];

const DEFAULT_FAILURE_REASON: &str = "the transformation failed for an unknown reason";

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    /// Waiting on a human-in-the-loop decision.
    Paused,
    CompletedSuccess,
    CompletedPartial,
    Failed,
    Stopped,
    Disposed,
}

/// Outcome of one migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCompletedResult {
    UnableToCreateJob {
        reason: String,
        retryable: bool,
    },
    JobAbortedBeforeStarting,
    JobAbortedMissingDependencies,
    JobAbortedZipTooLarge,
    JobPaused {
        job_id: JobId,
        download_artifact_id: String,
    },
    JobFailed {
        reason: String,
    },
    /// The service could not build the uploaded project.
    JobFailedInitialBuild {
        reason: String,
    },
    JobPartiallySucceeded {
        job_id: JobId,
        target_version: JavaVersion,
    },
    JobCompletedSuccessfully {
        job_id: JobId,
    },
    Stopped,
    ManagerDisposed,
}

impl JobCompletedResult {
    /// Job whose results can be downloaded, if any.
    pub fn result_job_id(&self) -> Option<&JobId> {
        match self {
            JobCompletedResult::JobPartiallySucceeded { job_id, .. }
            | JobCompletedResult::JobCompletedSuccessfully { job_id } => Some(job_id),
            _ => None,
        }
    }

    fn phase(&self) -> Phase {
        match self {
            JobCompletedResult::JobCompletedSuccessfully { .. } => Phase::CompletedSuccess,
            JobCompletedResult::JobPartiallySucceeded { .. } => Phase::CompletedPartial,
            JobCompletedResult::JobPaused { .. } => Phase::Paused,
            JobCompletedResult::Stopped => Phase::Stopped,
            JobCompletedResult::ManagerDisposed => Phase::Disposed,
            JobCompletedResult::UnableToCreateJob { .. }
            | JobCompletedResult::JobFailed { .. }
            | JobCompletedResult::JobFailedInitialBuild { .. } => Phase::Failed,
            JobCompletedResult::JobAbortedBeforeStarting
            | JobCompletedResult::JobAbortedMissingDependencies
            | JobCompletedResult::JobAbortedZipTooLarge => Phase::Idle,
        }
    }
}

impl std::fmt::Display for JobCompletedResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobCompletedResult::UnableToCreateJob { reason, .. } => {
                write!(f, "unable to create job: {reason}")
            }
            JobCompletedResult::JobAbortedBeforeStarting => write!(f, "job aborted before starting"),
            JobCompletedResult::JobAbortedMissingDependencies => {
                write!(f, "job aborted: missing dependencies")
            }
            JobCompletedResult::JobAbortedZipTooLarge => write!(f, "job aborted: project too large"),
            JobCompletedResult::JobPaused { job_id, .. } => write!(f, "job {job_id} paused"),
            JobCompletedResult::JobFailed { reason } => write!(f, "job failed: {reason}"),
            JobCompletedResult::JobFailedInitialBuild { reason } => {
                write!(f, "initial build failed: {reason}")
            }
            JobCompletedResult::JobPartiallySucceeded {
                job_id,
                target_version,
            } => write!(f, "job {job_id} partially migrated to {target_version}"),
            JobCompletedResult::JobCompletedSuccessfully { job_id } => {
                write!(f, "job {job_id} completed")
            }
            JobCompletedResult::Stopped => write!(f, "job stopped"),
            JobCompletedResult::ManagerDisposed => write!(f, "manager disposed"),
        }
    }
}

struct Inner {
    phase: Phase,
    job_id: Option<JobId>,
    status: JobStatus,
    /// Last status seen that was not a failure, used to tell initial-build
    /// failures apart. `None` until one is observed.
    last_progress: Option<JobStatus>,
    plan: Option<TransformationPlan>,
    hil: Option<HilArtifact>,
    build_result: Option<BuildResult>,
    creation_time: Option<DateTime<Utc>>,
}

/// Owns one job's identity, status, plan snapshot and pause state.
pub struct JobStateMachine {
    context: SessionContext,
    client: Arc<dyn RemoteJobClient>,
    poller: JobPoller,
    cancel: CancellationToken,
    stop_requested: AtomicBool,
    inner: Mutex<Inner>,
}

impl JobStateMachine {
    pub fn new(
        context: SessionContext,
        client: Arc<dyn RemoteJobClient>,
        settings: PollSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            poller: JobPoller::new(client.clone(), settings),
            context,
            client,
            cancel,
            stop_requested: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                job_id: None,
                status: JobStatus::Unknown,
                last_progress: None,
                plan: None,
                hil: None,
                build_result: None,
                creation_time: None,
            }),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.inner.lock().job_id.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().status
    }

    pub fn plan(&self) -> Option<TransformationPlan> {
        self.inner.lock().plan.clone()
    }

    pub fn hil_artifact(&self) -> Option<HilArtifact> {
        self.inner.lock().hil.clone()
    }

    pub fn build_result(&self) -> Option<BuildResult> {
        self.inner.lock().build_result
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().creation_time
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.lock().phase = phase;
    }

    /// Build, package and upload the project, then create the remote job.
    ///
    /// Failures before a remote job exists come back as the matching
    /// completion result and never reach polling.
    pub async fn create_job(
        &self,
        packager: &dyn ProjectPackager,
    ) -> Result<JobId, JobCompletedResult> {
        let outcome = self.create_job_inner(packager).await;
        if let Err(result) = &outcome {
            tracing::info!(result = %result, "job not created");
            self.set_phase(result.phase());
        }
        outcome
    }

    async fn create_job_inner(
        &self,
        packager: &dyn ProjectPackager,
    ) -> Result<JobId, JobCompletedResult> {
        if self.is_disposed() {
            return Err(JobCompletedResult::ManagerDisposed);
        }
        self.set_phase(Phase::Starting);

        let build = packager.build_dependencies(&self.context).await;
        self.inner.lock().build_result = Some(build);
        match build {
            BuildResult::Success => {}
            BuildResult::Failure => return Err(JobCompletedResult::JobAbortedMissingDependencies),
            BuildResult::Cancelled => return Err(JobCompletedResult::JobAbortedBeforeStarting),
        }

        let payload = packager.package(&self.context).await.map_err(|err| match err {
            PackagingError::ZipCreationFailed(_) => JobCompletedResult::UnableToCreateJob {
                reason: err.to_string(),
                retryable: false,
            },
            PackagingError::ZipTooLarge => JobCompletedResult::JobAbortedZipTooLarge,
            PackagingError::MissingDependencies => {
                JobCompletedResult::JobAbortedMissingDependencies
            }
            PackagingError::Cancelled => JobCompletedResult::JobAbortedBeforeStarting,
        })?;

        if self.is_disposed() {
            return Err(JobCompletedResult::ManagerDisposed);
        }
        if self.is_stop_requested() {
            return Err(JobCompletedResult::JobAbortedBeforeStarting);
        }

        let request = StartJobRequest {
            context: self.context.clone(),
            payload,
        };
        let job_id = self.client.start_job(&request).await.map_err(|err| {
            tracing::error!(error = %err, "failed to start transformation job");
            JobCompletedResult::UnableToCreateJob {
                reason: format!("unable to start job: {err}"),
                retryable: true,
            }
        })?;

        {
            let mut inner = self.inner.lock();
            inner.job_id = Some(job_id.clone());
            inner.status = JobStatus::Created;
            inner.last_progress = Some(JobStatus::Created);
            inner.phase = Phase::Running;
        }
        tracing::info!(job_id = %job_id, source = %self.context.source_version, target = %self.context.target_version, "transformation job started");

        // A stop requested while the upload was in flight had no job to cancel.
        if self.is_stop_requested() {
            if let Err(err) = self.cancel_remote(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %err, "late stop request not acknowledged");
            }
        }
        Ok(job_id)
    }

    /// Bind this machine to a job that already exists remotely.
    pub fn attach(&self, details: &JobDetails, plan: Option<TransformationPlan>) {
        let mut inner = self.inner.lock();
        inner.job_id = Some(details.job_id.clone());
        inner.status = details.status;
        inner.last_progress = (details.status != JobStatus::Failed).then_some(details.status);
        inner.plan = plan;
        inner.creation_time = details.creation_time;
        inner.phase = Phase::Running;
    }

    /// Poll the job until it completes, pauses, stops or fails.
    ///
    /// Returns `Err(AccessDenied)` when credentials could not be refreshed;
    /// the job is left untouched remotely so it can be resumed later.
    pub async fn poll_until_completion(
        &self,
        listener: &dyn TransformListener,
    ) -> TransformResult<JobCompletedResult> {
        let job_id = self.job_id().ok_or(TransformError::NoActiveJob)?;
        self.set_phase(Phase::Running);

        let polled = self
            .poller
            .poll_until(
                &job_id,
                FAIL_ON,
                &self.cancel,
                |prev, curr, plan| self.observe(&job_id, listener, prev, curr, plan),
                |status, plan| match status {
                    JobStatus::Paused => {
                        let ready = plan.is_some_and(|p| p.paused_artifact().is_some());
                        if !ready {
                            tracing::debug!(job_id = %job_id, "paused without a plan artifact yet, polling on");
                        }
                        ready
                    }
                    status => SUCCEED_ON.contains(&status),
                },
            )
            .await;

        let result = match polled {
            Ok(polled) => self.classify(&job_id, polled)?,
            Err(TransformError::Disposed) => JobCompletedResult::ManagerDisposed,
            Err(err) => JobCompletedResult::JobFailed {
                reason: err.to_string(),
            },
        };
        tracing::info!(job_id = %job_id, result = %result, "polling finished");
        self.set_phase(result.phase());
        Ok(result)
    }

    fn observe(
        &self,
        job_id: &JobId,
        listener: &dyn TransformListener,
        previous: JobStatus,
        current: JobStatus,
        plan: Option<&TransformationPlan>,
    ) {
        {
            let mut inner = self.inner.lock();
            inner.status = current;
            if current != JobStatus::Failed {
                inner.last_progress = Some(current);
                inner.plan = plan.cloned();
            }
            if current.has_plan() {
                match plan.and_then(|p| HilArtifact::from_plan(job_id, p)) {
                    Some(hil) => {
                        if inner.hil.as_ref() != Some(&hil) {
                            tracing::info!(job_id = %job_id, artifact_id = %hil.artifact_id, "job paused for user input");
                        }
                        inner.hil = Some(hil);
                        inner.phase = Phase::Paused;
                    }
                    None if inner.phase == Phase::Paused => {
                        inner.hil = None;
                        inner.phase = Phase::Running;
                    }
                    None => {}
                }
            }
        }
        listener.on_state_change(previous, current, plan);
    }

    fn classify(
        &self,
        job_id: &JobId,
        polled: PollingResult,
    ) -> TransformResult<JobCompletedResult> {
        let result = match polled.outcome {
            PollOutcome::AccessDenied => {
                return Err(TransformError::AccessDenied(format!(
                    "credentials could not be refreshed while polling job {job_id}"
                )));
            }
            PollOutcome::FailedStatus => {
                let reason = polled
                    .job_details
                    .and_then(|d| d.reason)
                    .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
                let early = self
                    .inner
                    .lock()
                    .last_progress
                    .is_some_and(|status| status.is_initial_build());
                if polled.status == JobStatus::Failed && early {
                    JobCompletedResult::JobFailedInitialBuild { reason }
                } else {
                    JobCompletedResult::JobFailed { reason }
                }
            }
            PollOutcome::Succeeded => match polled.status {
                JobStatus::Completed => JobCompletedResult::JobCompletedSuccessfully {
                    job_id: job_id.clone(),
                },
                JobStatus::PartiallyCompleted => JobCompletedResult::JobPartiallySucceeded {
                    job_id: job_id.clone(),
                    target_version: self.context.target_version,
                },
                JobStatus::Stopped => JobCompletedResult::Stopped,
                JobStatus::Paused => match self.hil_artifact() {
                    Some(hil) => JobCompletedResult::JobPaused {
                        job_id: job_id.clone(),
                        download_artifact_id: hil.artifact_id,
                    },
                    None => JobCompletedResult::JobFailed {
                        reason: "job paused without an artifact to act on".to_string(),
                    },
                },
                other => JobCompletedResult::JobFailed {
                    reason: format!("polling ended on unexpected status {other}"),
                },
            },
        };
        Ok(result)
    }

    /// Ask the remote service to stop the job.
    ///
    /// Only the first call has any effect; later calls return `Ok(false)`
    /// without contacting the service. A stop requested before the job
    /// exists is applied once it is created.
    pub async fn request_stop(&self) -> TransformResult<bool> {
        if !self.mark_stop_requested() {
            return Ok(false);
        }
        self.send_stop().await?;
        Ok(true)
    }

    /// Record the stop intent. Returns `false` if it was already recorded.
    pub(crate) fn mark_stop_requested(&self) -> bool {
        self.stop_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Send the cancel for a recorded stop intent.
    ///
    /// A paused job has no poller left to observe the stop, so once the
    /// cancel is acknowledged it moves straight to `Stopped`; the return
    /// value reports that.
    pub(crate) async fn send_stop(&self) -> TransformResult<bool> {
        let Some(job_id) = self.job_id() else {
            tracing::info!("stop requested before the job was created");
            return Ok(false);
        };
        self.cancel_remote(&job_id).await?;

        let mut inner = self.inner.lock();
        if inner.phase != Phase::Paused {
            return Ok(false);
        }
        tracing::info!(job_id = %job_id, "paused job stopped");
        inner.hil = None;
        inner.status = JobStatus::Stopped;
        inner.phase = Phase::Stopped;
        Ok(true)
    }

    async fn cancel_remote(&self, job_id: &JobId) -> TransformResult<()> {
        match self.client.cancel_job(job_id).await {
            Ok(true) => {
                tracing::info!(job_id = %job_id, "stop acknowledged");
                Ok(())
            }
            Ok(false) => {
                tracing::error!(job_id = %job_id, "stop request not acknowledged");
                Err(TransformError::StopFailed(job_id.to_string()))
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "stop request failed");
                Err(TransformError::StopFailed(job_id.to_string()))
            }
        }
    }

    /// Resume a job paused for user input.
    pub async fn resume_after_pause(&self, action: UserActionStatus) -> TransformResult<JobStatus> {
        let job_id = self.job_id().ok_or(TransformError::NoActiveJob)?;
        if self.phase() != Phase::Paused {
            tracing::warn!(job_id = %job_id, phase = ?self.phase(), "resuming a job that is not paused");
        }
        let status = self.client.resume_job(&job_id, action).await?;
        tracing::info!(job_id = %job_id, ?action, %status, "job resumed");

        let mut inner = self.inner.lock();
        inner.hil = None;
        inner.status = status;
        inner.phase = Phase::Running;
        Ok(status)
    }

    /// Tear down: in-flight polling stops at its next check.
    pub fn dispose(&self) {
        self.cancel.cancel();
        self.set_phase(Phase::Disposed);
    }
}
