//! Orchestrator façade.
//!
//! One [`OrchestratorManager`] exists per project session. It owns at most
//! one active [`JobStateMachine`], runs its start → poll pipeline on a
//! background task, mirrors the ongoing flag into [`SessionPersistence`],
//! and fans results out to the [`TransformListener`].
//!
//! # Flags
//!
//! | Flag | Set | Cleared |
//! |------|-----|---------|
//! | `in_progress` | `start()` / `resume()` (compare-and-set) | every pipeline exit except a pause, including a panic |
//! | `resuming` | `resume()` (compare-and-set) | when `resume()` returns |
//! | `build_running` | local build and packaging | before the remote job is created |
//!
//! **Invariants:**
//! - Starting while a job is in progress never calls `start_job` a second time.
//! - `in_progress` is released on every pipeline exit path, a panicking
//!   listener included; a paused job keeps it until resumed, stopped or
//!   disposed.
//! - Access denied leaves the persisted record ongoing so a later
//!   `resume()` can pick the job up again.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifact::{ArchiveInspector, ArtifactStore, DownloadOutcome, TransformationSummary};
use crate::client::{BuildResult, ProjectPackager, RemoteJobClient, UserActionStatus};
use crate::config::OrchestratorConfig;
use crate::error::{TransformError, TransformResult};
use crate::job::{JobId, JobStatus};
use crate::listener::{Notification, TransformListener};
use crate::machine::{JobCompletedResult, JobStateMachine, Phase};
use crate::persistence::{PersistedRecord, SessionPersistence};
use crate::plan::{HilArtifact, TransformationPlan};
use crate::poller::PollSettings;
use crate::session::{SessionContext, ValidationResult};

/// Handle to a running start → poll pipeline.
pub type PipelineHandle = JoinHandle<TransformResult<JobCompletedResult>>;

/// Outcome of [`OrchestratorManager::start`].
#[derive(Debug)]
pub enum StartOutcome {
    /// The pipeline is running in the background.
    Launched(PipelineHandle),
    /// Another job is in progress; nothing was started.
    AlreadyActive,
    /// Local preconditions failed; nothing was started.
    Invalid(ValidationResult),
}

/// Outcome of [`OrchestratorManager::resume`].
#[derive(Debug)]
pub enum ResumeOutcome {
    /// Another resume attempt is running.
    AlreadyResuming,
    /// A job is already in progress.
    AlreadyActive,
    /// No job was ongoing when the record was last written.
    NothingToResume,
    /// The job finished while the host was closed.
    AlreadyFinished(JobStatus),
    /// The job is gone or unrecognized; the ongoing flag was cleared.
    Cleared(JobStatus),
    /// Polling resumed in the background.
    Resumed(PipelineHandle),
}

/// Read-only view of the manager state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSnapshot {
    pub last_result: Option<JobCompletedResult>,
    pub last_build_result: Option<BuildResult>,
    pub job_active: bool,
    pub resuming: bool,
    pub stopping: bool,
    pub build_running: bool,
    pub active_job_id: Option<JobId>,
    pub plan: Option<TransformationPlan>,
}

/// Resets a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Releases the session if a pipeline task ends without returning, i.e. it
/// panicked or was aborted. The persisted record is left as it was so the
/// job can be resumed.
struct PipelineGuard {
    manager: Arc<OrchestratorManager>,
    machine: Arc<JobStateMachine>,
    armed: bool,
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon(&self.machine);
        }
    }
}

enum Pipeline {
    NewJob,
    Polling,
}

pub struct OrchestratorManager {
    client: Arc<dyn RemoteJobClient>,
    packager: Arc<dyn ProjectPackager>,
    persistence: Arc<dyn SessionPersistence>,
    listener: Arc<dyn TransformListener>,
    artifacts: ArtifactStore,
    settings: PollSettings,
    session: Mutex<Option<Arc<JobStateMachine>>>,
    in_progress: AtomicBool,
    resuming: AtomicBool,
    build_running: AtomicBool,
    root: CancellationToken,
    last_result: Mutex<Option<JobCompletedResult>>,
    last_build_result: Mutex<Option<BuildResult>>,
}

impl OrchestratorManager {
    pub fn new(
        config: &OrchestratorConfig,
        client: Arc<dyn RemoteJobClient>,
        packager: Arc<dyn ProjectPackager>,
        persistence: Arc<dyn SessionPersistence>,
        listener: Arc<dyn TransformListener>,
    ) -> Self {
        Self {
            client,
            packager,
            persistence,
            listener,
            artifacts: ArtifactStore::new(config.artifact_dir.clone()),
            settings: config.poll_settings(),
            session: Mutex::new(None),
            in_progress: AtomicBool::new(false),
            resuming: AtomicBool::new(false),
            build_running: AtomicBool::new(false),
            root: CancellationToken::new(),
            last_result: Mutex::new(None),
            last_build_result: Mutex::new(None),
        }
    }

    pub fn with_archive_inspector(mut self, inspector: Arc<dyn ArchiveInspector>) -> Self {
        self.artifacts = self.artifacts.with_inspector(inspector);
        self
    }

    /// Check local preconditions without starting anything.
    pub fn validate(&self, context: &SessionContext) -> ValidationResult {
        context.validate()
    }

    pub fn is_job_active(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    fn active_session(&self) -> Option<Arc<JobStateMachine>> {
        self.session.lock().clone()
    }

    fn is_current(&self, machine: &Arc<JobStateMachine>) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, machine))
    }

    fn new_session(&self, context: SessionContext) -> Arc<JobStateMachine> {
        let machine = Arc::new(JobStateMachine::new(
            context,
            self.client.clone(),
            self.settings,
            self.root.child_token(),
        ));
        *self.session.lock() = Some(machine.clone());
        machine
    }

    fn persist(&self, record: &PersistedRecord) {
        if let Err(err) = self.persistence.save(record) {
            tracing::error!(error = %err, ongoing = record.ongoing, "failed to save session record");
        }
    }

    /// Start a new job for `context`.
    ///
    /// Returns immediately; the job runs on a background task.
    pub fn start(self: &Arc<Self>, context: SessionContext) -> StartOutcome {
        let validation = context.validate();
        if !validation.is_valid() {
            let reason = validation.reason.clone().unwrap_or_default();
            tracing::warn!(project = %context.project.display(), reason = %reason, "project is not eligible");
            self.listener.notify(Notification::InvalidProject { reason });
            return StartOutcome::Invalid(validation);
        }

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("a transformation is already in progress, ignoring start");
            return StartOutcome::AlreadyActive;
        }

        tracing::info!(module = %context.module_name(), source = %context.source_version, target = %context.target_version, "starting transformation");
        let machine = self.new_session(context);
        StartOutcome::Launched(self.spawn_pipeline(machine, Pipeline::NewJob))
    }

    fn spawn_pipeline(
        self: &Arc<Self>,
        machine: Arc<JobStateMachine>,
        pipeline: Pipeline,
    ) -> PipelineHandle {
        let mut guard = PipelineGuard {
            manager: self.clone(),
            machine,
            armed: true,
        };
        tokio::spawn(async move {
            let machine = guard.machine.clone();
            let result = match pipeline {
                Pipeline::NewJob => guard.manager.run_new_job(machine).await,
                Pipeline::Polling => guard.manager.run_polling(machine).await,
            };
            guard.armed = false;
            result
        })
    }

    fn abandon(&self, machine: &Arc<JobStateMachine>) {
        tracing::error!(job_id = ?machine.job_id(), "transformation pipeline ended abnormally, releasing the session");
        machine.dispose();
        if self.is_current(machine) {
            self.build_running.store(false, Ordering::SeqCst);
        }
        self.release(machine);
    }

    async fn run_new_job(
        &self,
        machine: Arc<JobStateMachine>,
    ) -> TransformResult<JobCompletedResult> {
        self.build_running.store(true, Ordering::SeqCst);
        let created = machine.create_job(self.packager.as_ref()).await;
        self.build_running.store(false, Ordering::SeqCst);
        *self.last_build_result.lock() = machine.build_result();

        let outcome = match created {
            Ok(job_id) => {
                self.persist(&PersistedRecord::ongoing(job_id, machine.context()));
                machine.poll_until_completion(self.listener.as_ref()).await
            }
            Err(result) => Ok(result),
        };
        self.finish(&machine, outcome)
    }

    async fn run_polling(
        &self,
        machine: Arc<JobStateMachine>,
    ) -> TransformResult<JobCompletedResult> {
        let outcome = machine.poll_until_completion(self.listener.as_ref()).await;
        self.finish(&machine, outcome)
    }

    fn release(&self, machine: &Arc<JobStateMachine>) {
        if self.is_current(machine) {
            self.in_progress.store(false, Ordering::SeqCst);
        }
    }

    fn finish(
        &self,
        machine: &Arc<JobStateMachine>,
        outcome: TransformResult<JobCompletedResult>,
    ) -> TransformResult<JobCompletedResult> {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.release(machine);
                if err.is_access_denied() {
                    tracing::error!(job_id = ?machine.job_id(), error = %err, "job left ongoing, credentials expired");
                    self.listener.notify(Notification::UnableToResume {
                        reason: err.to_string(),
                    });
                } else {
                    tracing::error!(job_id = ?machine.job_id(), error = %err, "transformation pipeline failed");
                    self.persist_finished(machine);
                    self.listener.notify(Notification::Failed {
                        reason: err.to_string(),
                        retryable: err.is_retryable(),
                    });
                }
                return Err(err);
            }
        };

        *self.last_result.lock() = Some(result.clone());
        match &result {
            JobCompletedResult::JobPaused { .. } => {
                if let Some(artifact) = machine.hil_artifact() {
                    self.listener.on_paused(&artifact);
                    self.listener
                        .notify(Notification::ActionNeeded { artifact });
                }
            }
            JobCompletedResult::ManagerDisposed => {
                tracing::warn!(job_id = ?machine.job_id(), "session disposed while the job was running");
                self.release(machine);
            }
            _ => {
                self.persist_finished(machine);
                self.release(machine);
                self.listener.on_completion(&result);
                let stopped_by_user = machine.is_stop_requested()
                    && matches!(
                        result,
                        JobCompletedResult::Stopped | JobCompletedResult::JobAbortedBeforeStarting
                    );
                if stopped_by_user {
                    self.listener.on_stopped();
                    self.listener.notify(Notification::TransformationStopped);
                } else if let Some(notification) = Notification::for_result(&result) {
                    self.listener.notify(notification);
                }
            }
        }
        Ok(result)
    }

    fn persist_finished(&self, machine: &JobStateMachine) {
        if let Some(job_id) = machine.job_id() {
            self.persist(&PersistedRecord::ongoing(job_id, machine.context()).finished());
        }
    }

    /// Ask the remote service to stop the active job.
    ///
    /// Returns `Ok(false)` when there is nothing to stop or a stop was
    /// already requested. When the service does not acknowledge the
    /// request the job stays active.
    pub async fn stop(&self) -> TransformResult<bool> {
        if !self.is_job_active() {
            return Ok(false);
        }
        let Some(machine) = self.active_session() else {
            return Ok(false);
        };
        if !machine.mark_stop_requested() {
            return Ok(false);
        }

        self.listener.notify(Notification::Stopping);
        match machine.send_stop().await {
            Ok(true) => {
                self.finish(&machine, Ok(JobCompletedResult::Stopped))?;
                Ok(true)
            }
            Ok(false) => Ok(true),
            Err(err) => {
                self.listener.notify(Notification::StopFailed);
                Err(err)
            }
        }
    }

    /// Pick up a job that was ongoing when the record was last written.
    ///
    /// `on_open` marks the attempt made when the project is first opened;
    /// the stored project is then re-validated and problems are logged.
    pub async fn resume(self: &Arc<Self>, on_open: bool) -> TransformResult<ResumeOutcome> {
        if self
            .resuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(ResumeOutcome::AlreadyResuming);
        }
        let _resuming = FlagGuard(&self.resuming);

        if self.is_job_active() {
            return Ok(ResumeOutcome::AlreadyActive);
        }

        let record = self.persistence.load()?;
        if !record.ongoing {
            return Ok(ResumeOutcome::NothingToResume);
        }
        let (Some(job_id), Some(context)) = (record.last_job_id.clone(), record.context()) else {
            tracing::warn!("ongoing session record has no job, clearing it");
            self.persist(&record.finished());
            return Ok(ResumeOutcome::NothingToResume);
        };

        if on_open {
            let validation = context.validate();
            if !validation.is_valid() {
                tracing::warn!(job_id = %job_id, reason = ?validation.reason, "resuming a job for a project that no longer validates");
            }
        }

        tracing::info!(job_id = %job_id, "attempting to resume job");
        let details = match self.client.get_job(&job_id).await {
            Ok(details) => details,
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "unable to resume job");
                self.listener.notify(Notification::UnableToResume {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        match details.status {
            JobStatus::Completed | JobStatus::PartiallyCompleted => {
                self.listener.on_resuming();
                self.persist(&record.finished());
                self.listener.notify(Notification::AlreadyFinished {
                    job_id,
                    status: details.status,
                });
                Ok(ResumeOutcome::AlreadyFinished(details.status))
            }
            JobStatus::Unknown => {
                self.listener.on_resuming();
                self.persist(&record.finished());
                self.listener.notify(Notification::UnknownStatusOnResume);
                Ok(ResumeOutcome::Cleared(details.status))
            }
            JobStatus::Stopped | JobStatus::Stopping => {
                self.listener.on_resuming();
                self.persist(&record.finished());
                Ok(ResumeOutcome::Cleared(details.status))
            }
            status => {
                if self
                    .in_progress
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Ok(ResumeOutcome::AlreadyActive);
                }
                self.listener.on_resuming();

                let plan = if status.has_plan() {
                    match self.client.get_plan(&job_id).await {
                        Ok(plan) => Some(plan),
                        Err(err) => {
                            tracing::warn!(job_id = %job_id, error = %err, "plan fetch failed on resume");
                            None
                        }
                    }
                } else {
                    None
                };

                let machine = self.new_session(context);
                machine.attach(&details, plan);
                tracing::info!(job_id = %job_id, %status, "resumed polling");
                self.listener.notify(Notification::JobOngoing { job_id });

                Ok(ResumeOutcome::Resumed(self.spawn_pipeline(machine, Pipeline::Polling)))
            }
        }
    }

    /// Answer a paused job and continue polling it.
    pub async fn resume_paused(
        self: &Arc<Self>,
        action: UserActionStatus,
    ) -> TransformResult<PipelineHandle> {
        let machine = self
            .active_session()
            .filter(|m| m.phase() == Phase::Paused)
            .ok_or(TransformError::NoActiveJob)?;

        machine.resume_after_pause(action).await?;
        Ok(self.spawn_pipeline(machine, Pipeline::Polling))
    }

    /// Download the artifact the paused job is waiting on.
    pub async fn download_hil_artifact(&self) -> TransformResult<(HilArtifact, PathBuf)> {
        let artifact = self
            .active_session()
            .and_then(|m| m.hil_artifact())
            .ok_or(TransformError::NoActiveJob)?;
        let path = self
            .artifacts
            .download_hil_artifact(self.client.as_ref(), &artifact)
            .await?;
        Ok((artifact, path))
    }

    pub async fn download_result(&self, job_id: &JobId) -> TransformResult<DownloadOutcome> {
        self.artifacts.download(self.client.as_ref(), job_id).await
    }

    pub fn summary(&self, job_id: &JobId) -> Option<TransformationSummary> {
        self.artifacts.summary(job_id)
    }

    pub fn query(&self) -> OrchestratorSnapshot {
        let session = self.active_session();
        let job_active = self.is_job_active();
        OrchestratorSnapshot {
            last_result: self.last_result.lock().clone(),
            last_build_result: *self.last_build_result.lock(),
            job_active,
            resuming: self.resuming.load(Ordering::SeqCst),
            stopping: job_active && session.as_ref().is_some_and(|m| m.is_stop_requested()),
            build_running: self.build_running.load(Ordering::SeqCst),
            active_job_id: session
                .as_ref()
                .filter(|_| job_active)
                .and_then(|m| m.job_id()),
            plan: session.and_then(|m| m.plan()),
        }
    }

    /// Drop the active session after the user's credentials changed.
    ///
    /// The remote job keeps running and the record stays ongoing.
    pub fn handle_credentials_changed(&self) {
        if let Some(machine) = self.session.lock().take() {
            tracing::info!(job_id = ?machine.job_id(), "credentials changed, disposing session");
            machine.dispose();
        }
        self.in_progress.store(false, Ordering::SeqCst);
    }

    /// Tear down every session. Called when the project closes.
    pub fn dispose(&self) {
        self.root.cancel();
        if let Some(machine) = self.session.lock().as_ref() {
            machine.dispose();
        }
        self.in_progress.store(false, Ordering::SeqCst);
    }
}
