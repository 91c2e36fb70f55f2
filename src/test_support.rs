//! Scripted collaborators shared by unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{
    BuildResult, PackagingError, ProjectPackager, RemoteJobClient, StartJobRequest,
    UploadPayload, UserActionStatus,
};
use crate::error::{TransformError, TransformResult};
use crate::job::{JobDetails, JobId, JobStatus};
use crate::listener::{Notification, TransformListener};
use crate::machine::JobCompletedResult;
use crate::plan::{
    DownloadArtifact, HilArtifact, PlanStep, ProgressUpdate, StepStatus, TransformationPlan,
};
use crate::session::{JavaVersion, SessionContext};

/// One scripted response to `get_job`.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(JobStatus),
    Failed(String),
    Throttled,
    AccessDenied,
    ServerError,
}

/// Remote client replaying a fixed status script. The last entry repeats
/// once the script is exhausted.
pub struct MockClient {
    script: Mutex<Vec<Scripted>>,
    plans: Mutex<Vec<TransformationPlan>>,
    job_id: JobId,
    fail_start: AtomicBool,
    fail_plans: AtomicBool,
    ack_cancel: AtomicBool,
    get_job_calls: AtomicUsize,
    plan_calls: AtomicUsize,
    start_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MockClient {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script),
            plans: Mutex::new(Vec::new()),
            job_id: JobId::new("job-1"),
            fail_start: AtomicBool::new(false),
            fail_plans: AtomicBool::new(false),
            ack_cancel: AtomicBool::new(true),
            get_job_calls: AtomicUsize::new(0),
            plan_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        Self::new(statuses.into_iter().map(Scripted::Status).collect())
    }

    /// Replace the remaining status script.
    pub fn set_script(&self, script: Vec<Scripted>) {
        *self.script.lock() = script;
        self.get_job_calls.store(0, Ordering::SeqCst);
    }

    pub fn set_plans(&self, plans: Vec<TransformationPlan>) {
        *self.plans.lock() = plans;
    }

    pub fn fail_plan_fetches(&self, fail: bool) {
        self.fail_plans.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn acknowledge_cancel(&self, ack: bool) {
        self.ack_cancel.store(ack, Ordering::SeqCst);
    }

    pub fn get_job_calls(&self) -> usize {
        self.get_job_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteJobClient for MockClient {
    async fn start_job(&self, _request: &StartJobRequest) -> TransformResult<JobId> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransformError::Validation("upload rejected".into()));
        }
        Ok(self.job_id.clone())
    }

    async fn get_job(&self, job_id: &JobId) -> TransformResult<JobDetails> {
        let n = self.get_job_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let entry = {
            let script = self.script.lock();
            script
                .get(n.min(script.len().saturating_sub(1)))
                .cloned()
                .unwrap_or(Scripted::Status(JobStatus::Unknown))
        };
        match entry {
            Scripted::Status(status) => Ok(JobDetails::new(job_id.clone(), status)),
            Scripted::Failed(reason) => {
                Ok(JobDetails::new(job_id.clone(), JobStatus::Failed).with_reason(reason))
            }
            Scripted::Throttled => Err(TransformError::Throttled("rate exceeded".into())),
            Scripted::AccessDenied => Err(TransformError::AccessDenied("token expired".into())),
            Scripted::ServerError => Err(TransformError::InternalServer("boom".into())),
        }
    }

    async fn get_plan(&self, _job_id: &JobId) -> TransformResult<TransformationPlan> {
        let n = self.plan_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_plans.load(Ordering::SeqCst) {
            return Err(TransformError::Service("plan unavailable".into()));
        }
        let plans = self.plans.lock();
        Ok(plans
            .get(n.min(plans.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_default())
    }

    async fn resume_job(
        &self,
        _job_id: &JobId,
        _action: UserActionStatus,
    ) -> TransformResult<JobStatus> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JobStatus::Transforming)
    }

    async fn cancel_job(&self, _job_id: &JobId) -> TransformResult<bool> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ack_cancel.load(Ordering::SeqCst))
    }

    async fn download_result_archive(
        &self,
        job_id: &JobId,
        artifact: Option<&DownloadArtifact>,
    ) -> TransformResult<Vec<Vec<u8>>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let label = artifact.map_or("result", |a| a.artifact_id.as_str());
        Ok(vec![format!("{job_id}:").into_bytes(), label.as_bytes().to_vec()])
    }

    async fn refresh_credentials(&self) -> TransformResult<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Packager with fixed outcomes.
pub struct MockPackager {
    pub build: BuildResult,
    pub package: Result<UploadPayload, PackagingError>,
}

impl Default for MockPackager {
    fn default() -> Self {
        Self {
            build: BuildResult::Success,
            package: Ok(UploadPayload {
                path: PathBuf::from("/tmp/project.zip"),
                size_bytes: 1024,
            }),
        }
    }
}

#[async_trait]
impl ProjectPackager for MockPackager {
    async fn build_dependencies(&self, _context: &SessionContext) -> BuildResult {
        self.build
    }

    async fn package(&self, _context: &SessionContext) -> Result<UploadPayload, PackagingError> {
        self.package.clone()
    }
}

/// Everything a listener was told, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChange(JobStatus, JobStatus, Option<TransformationPlan>),
    Completion(JobCompletedResult),
    Paused(HilArtifact),
    Stopped,
    Resuming,
    Notified(Notification),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Notified(n) => Some(n.clone()),
                _ => None,
            })
            .collect()
    }
}

impl TransformListener for RecordingListener {
    fn on_state_change(
        &self,
        previous: JobStatus,
        current: JobStatus,
        plan: Option<&TransformationPlan>,
    ) {
        self.events
            .lock()
            .push(Event::StateChange(previous, current, plan.cloned()));
    }

    fn on_completion(&self, result: &JobCompletedResult) {
        self.events.lock().push(Event::Completion(result.clone()));
    }

    fn on_paused(&self, artifact: &HilArtifact) {
        self.events.lock().push(Event::Paused(artifact.clone()));
    }

    fn on_stopped(&self) {
        self.events.lock().push(Event::Stopped);
    }

    fn on_resuming(&self) {
        self.events.lock().push(Event::Resuming);
    }

    fn notify(&self, notification: Notification) {
        self.events.lock().push(Event::Notified(notification));
    }
}

pub fn sample_context() -> SessionContext {
    SessionContext::new(
        "/work/demo",
        "/work/demo/pom.xml",
        JavaVersion::Jdk8,
        JavaVersion::Jdk17,
    )
}

/// Plan snapshots of a job progressing through its first step. Stage 3
/// pauses the build for user input.
pub fn sample_plan(stage: usize) -> TransformationPlan {
    let mut first = PlanStep::new("1", "Step 1 - Update dependencies and code", StepStatus::Created);
    let applying = "Applying dependencies and code changes";
    let building = "Building in Java 17 environment";
    match stage {
        0 => {}
        1 => first = first.with_update(ProgressUpdate::new(applying, StepStatus::InProgress)),
        2 => {
            first = first
                .with_update(ProgressUpdate::new(applying, StepStatus::Completed))
                .with_update(ProgressUpdate::new(building, StepStatus::InProgress))
        }
        _ => {
            first = first
                .with_update(ProgressUpdate::new(applying, StepStatus::Completed))
                .with_update(
                    ProgressUpdate::new(building, StepStatus::Paused)
                        .with_description("Paused to get user input.")
                        .with_artifact(DownloadArtifact::new("someID", "CLIENT_INSTRUCTIONS")),
                )
        }
    }
    TransformationPlan::new(vec![
        first,
        PlanStep::new("2", "Step 2 - Build in Java 17 and fix any issues", StepStatus::Created),
        PlanStep::new("3", "Step 3 - Finalize code changes", StepStatus::Created),
    ])
}
