//! In-memory transformation service driving the orchestrator end to end.
//!
//! The mock service replays a fixed status sequence for every job. Run
//! with `--pause` to have the job stop for user input halfway and be
//! resumed from the demo.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;
use transform_orchestrator::{
    BuildResult, DownloadArtifact, JavaVersion, JobDetails, JobId, JobStatus, Notification,
    OrchestratorConfig, OrchestratorManager, PackagingError, PlanStep, ProgressUpdate,
    ProjectPackager, RemoteJobClient, SessionContext, StartJobRequest, StartOutcome, StepStatus,
    TransformListener, TransformResult, TransformationPlan, UploadPayload, UserActionStatus,
};

const HAPPY_PATH: &[JobStatus] = &[
    JobStatus::Started,
    JobStatus::Preparing,
    JobStatus::Prepared,
    JobStatus::Planning,
    JobStatus::Planned,
    JobStatus::Transforming,
    JobStatus::Transforming,
    JobStatus::Transforming,
    JobStatus::Completed,
];

const PAUSING_PATH: &[JobStatus] = &[
    JobStatus::Started,
    JobStatus::Preparing,
    JobStatus::Planning,
    JobStatus::Planned,
    JobStatus::Transforming,
    JobStatus::Paused,
];

/// Mock transformation service.
struct MockService {
    statuses: &'static [JobStatus],
    polls: AtomicUsize,
    resumed: AtomicUsize,
}

impl MockService {
    fn new(statuses: &'static [JobStatus]) -> Self {
        Self {
            statuses,
            polls: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
        }
    }

    fn status_at(&self, n: usize) -> JobStatus {
        if self.resumed.load(Ordering::SeqCst) > 0 {
            return if n % 2 == 0 {
                JobStatus::Transforming
            } else {
                JobStatus::Completed
            };
        }
        self.statuses
            .get(n.min(self.statuses.len().saturating_sub(1)))
            .copied()
            .unwrap_or(JobStatus::Unknown)
    }
}

fn plan_for(status: JobStatus) -> TransformationPlan {
    let build = match status {
        JobStatus::Paused => ProgressUpdate::new("Building in Java 17 environment", StepStatus::Paused)
            .with_description("Paused to get user input.")
            .with_artifact(DownloadArtifact::new("dep-choice", "CLIENT_INSTRUCTIONS")),
        JobStatus::Completed => {
            ProgressUpdate::new("Building in Java 17 environment", StepStatus::Completed)
        }
        _ => ProgressUpdate::new("Building in Java 17 environment", StepStatus::InProgress),
    };
    let done = if status == JobStatus::Completed {
        StepStatus::Completed
    } else {
        StepStatus::InProgress
    };
    TransformationPlan::new(vec![
        PlanStep::new("1", "Step 1 - Update dependencies and code", done)
            .with_update(ProgressUpdate::new(
                "Applying dependencies and code changes",
                StepStatus::Completed,
            ))
            .with_update(build),
        PlanStep::new("2", "Step 2 - Build in Java 17 and fix any issues", done),
    ])
}

#[async_trait]
impl RemoteJobClient for MockService {
    async fn start_job(&self, request: &StartJobRequest) -> TransformResult<JobId> {
        tracing::info!(payload = %request.payload.path.display(), "mock service accepted upload");
        Ok(JobId::new("mock-job-1"))
    }

    async fn get_job(&self, job_id: &JobId) -> TransformResult<JobDetails> {
        let status = self.status_at(self.polls.fetch_add(1, Ordering::SeqCst));
        Ok(JobDetails::new(job_id.clone(), status))
    }

    async fn get_plan(&self, _job_id: &JobId) -> TransformResult<TransformationPlan> {
        let last = self.polls.load(Ordering::SeqCst).saturating_sub(1);
        Ok(plan_for(self.status_at(last)))
    }

    async fn resume_job(
        &self,
        _job_id: &JobId,
        action: UserActionStatus,
    ) -> TransformResult<JobStatus> {
        tracing::info!(?action, "mock service resumed job");
        self.polls.store(0, Ordering::SeqCst);
        self.resumed.fetch_add(1, Ordering::SeqCst);
        Ok(JobStatus::Transforming)
    }

    async fn cancel_job(&self, _job_id: &JobId) -> TransformResult<bool> {
        Ok(true)
    }

    async fn download_result_archive(
        &self,
        job_id: &JobId,
        artifact: Option<&DownloadArtifact>,
    ) -> TransformResult<Vec<Vec<u8>>> {
        let name = artifact.map_or("result", |a| a.artifact_id.as_str());
        Ok(vec![format!("{job_id}/{name}").into_bytes()])
    }
}

struct MockPackager;

#[async_trait]
impl ProjectPackager for MockPackager {
    async fn build_dependencies(&self, _context: &SessionContext) -> BuildResult {
        BuildResult::Success
    }

    async fn package(&self, context: &SessionContext) -> Result<UploadPayload, PackagingError> {
        Ok(UploadPayload {
            path: context.project.join("upload.zip"),
            size_bytes: 4096,
        })
    }
}

struct ConsoleListener;

impl TransformListener for ConsoleListener {
    fn on_state_change(
        &self,
        previous: JobStatus,
        current: JobStatus,
        plan: Option<&TransformationPlan>,
    ) {
        let (done, total) = plan.map_or((0, 0), |p| p.progress());
        println!("  {previous:>20} -> {current:<20} steps {done}/{total}");
    }

    fn notify(&self, notification: Notification) {
        println!("  notification: {notification:?}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pause = std::env::args().any(|a| a == "--pause");
    let mut config = OrchestratorConfig {
        initial_poll_delay_ms: 200,
        poll_interval_ms: 200,
        ..OrchestratorConfig::default()
    };
    config.apply_env_overrides()?;

    let service = Arc::new(MockService::new(if pause { PAUSING_PATH } else { HAPPY_PATH }));
    let manager = Arc::new(OrchestratorManager::new(
        &config,
        service,
        Arc::new(MockPackager),
        config.session_persistence(),
        Arc::new(ConsoleListener),
    ));

    let context = SessionContext::new(
        std::env::temp_dir().join("demo-project"),
        PathBuf::from("demo-project/pom.xml"),
        JavaVersion::Jdk8,
        JavaVersion::Jdk17,
    );
    println!("Module: {}", context.module_name());

    let handle = match manager.start(context) {
        StartOutcome::Launched(handle) => handle,
        other => {
            println!("Not started: {other:?}");
            return Ok(());
        }
    };
    let mut result = handle.await??;
    println!("Result: {result}");

    if pause {
        let (artifact, path) = manager.download_hil_artifact().await?;
        println!("Artifact {} saved to {}", artifact.artifact_id, path.display());
        result = manager
            .resume_paused(UserActionStatus::Completed)
            .await?
            .await??;
        println!("Result: {result}");
    }

    if let Some(job_id) = result.result_job_id() {
        let downloaded = manager.download_result(job_id).await?;
        println!("Archive: {:?}", downloaded.path());
    }

    Ok(())
}
