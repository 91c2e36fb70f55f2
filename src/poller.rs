//! Remote status polling.
//!
//! [`JobPoller::poll`] drives the status loop for one job:
//!
//! ```text
//!   initial delay
//!        │
//!        ▼
//!   ┌─ loop head: cancelled? ──→ Disposed
//!   │             max duration? ──→ Timeout
//!   │  get_job ──→ Throttled ──→ retry
//!   │          ──→ AccessDenied ──→ refresh credentials (≤ 10 in a row)
//!   │  get_plan (plan-available statuses only, after a settle delay)
//!   │  (status, plan) changed? ──→ on_change(prev, curr, plan)
//!   │  sleep poll interval          (every iteration, every path)
//!   └─ status ∈ succeed_on ──→ Ok(succeeded)
//!      status ∈ fail_on    ──→ Ok(failed)
//! ```
//!
//! Observers see every distinct `(status, plan)` pair in the order the
//! poller observed them, and each `on_change` call returns before the
//! next remote call is made.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::RemoteJobClient;
use crate::error::{TransformError, TransformResult};
use crate::job::{JobDetails, JobId, JobStatus};
use crate::plan::TransformationPlan;

/// Consecutive credential refreshes allowed before access-denied is surfaced.
pub const MAX_CREDENTIAL_REFRESHES: u32 = 10;

/// Delay between seeing a plan-available status and fetching the plan.
pub const PLAN_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on a single polling run (7 days).
pub const DEFAULT_MAX_POLL_DURATION: Duration = Duration::from_secs(604_800);

/// Timing parameters of a polling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay before the first status fetch.
    pub initial_delay: Duration,
    /// Delay after every iteration.
    pub poll_interval: Duration,
    pub max_duration: Duration,
}

impl PollSettings {
    pub fn new(initial_delay: Duration, poll_interval: Duration) -> Self {
        Self {
            initial_delay,
            poll_interval,
            max_duration: DEFAULT_MAX_POLL_DURATION,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(5))
    }
}

/// Why a polling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A status in the success set was observed.
    Succeeded,
    /// A status in the failure set was observed.
    FailedStatus,
    /// Credentials could not be refreshed.
    AccessDenied,
}

/// Result of a polling run that did not raise.
#[derive(Debug, Clone)]
pub struct PollingResult {
    pub succeeded: bool,
    /// Last job details successfully fetched.
    pub job_details: Option<JobDetails>,
    /// Last observed status.
    pub status: JobStatus,
    /// Last plan delivered to observers.
    pub plan: Option<TransformationPlan>,
    pub outcome: PollOutcome,
}

enum LoopExit {
    FailedStatus,
    AccessDenied(TransformError),
    Error(TransformError),
}

#[derive(Default)]
struct PollState {
    /// Last status delivered (or that would have been delivered) to observers.
    status: Option<JobStatus>,
    /// Status that ended the run, when it differs from `status`.
    final_status: Option<JobStatus>,
    plan: Option<TransformationPlan>,
    details: Option<JobDetails>,
    refreshes: u32,
}

impl PollState {
    fn status(&self) -> JobStatus {
        self.status.unwrap_or(JobStatus::Unknown)
    }

    fn into_result(self, outcome: PollOutcome) -> PollingResult {
        let status = self.final_status.unwrap_or_else(|| self.status());
        PollingResult {
            succeeded: outcome == PollOutcome::Succeeded,
            job_details: self.details,
            status,
            plan: self.plan,
            outcome,
        }
    }
}

/// Polls a remote job until it reaches a caller-specified status.
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<dyn RemoteJobClient>,
    settings: PollSettings,
}

impl JobPoller {
    pub fn new(client: Arc<dyn RemoteJobClient>, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Poll `job_id` until its status lands in `succeed_on` or `fail_on`.
    ///
    /// `on_change(previous, current, plan)` runs synchronously for every
    /// distinct `(status, plan)` pair whose status is not in `fail_on`.
    /// When the run ends any other way than success, it runs once more
    /// with `current = Failed`, unless `cancel` fired.
    ///
    /// Returns `Ok` with `succeeded = false` for a failure status or
    /// exhausted credential refreshes. Cancellation raises
    /// [`TransformError::Disposed`], exceeding the maximum duration raises
    /// [`TransformError::Timeout`], and non-transient client errors are
    /// passed through.
    pub async fn poll<F>(
        &self,
        job_id: &JobId,
        succeed_on: &[JobStatus],
        fail_on: &[JobStatus],
        cancel: &CancellationToken,
        on_change: F,
    ) -> TransformResult<PollingResult>
    where
        F: FnMut(JobStatus, JobStatus, Option<&TransformationPlan>) + Send,
    {
        self.poll_until(job_id, fail_on, cancel, on_change, |status, _| {
            succeed_on.contains(&status)
        })
        .await
    }

    /// Like [`poll`](Self::poll), but success is decided by `done(status, plan)`
    /// with the latest plan, so a run can wait for the plan to catch up with
    /// the status.
    pub async fn poll_until<F, D>(
        &self,
        job_id: &JobId,
        fail_on: &[JobStatus],
        cancel: &CancellationToken,
        mut on_change: F,
        mut done: D,
    ) -> TransformResult<PollingResult>
    where
        F: FnMut(JobStatus, JobStatus, Option<&TransformationPlan>) + Send,
        D: FnMut(JobStatus, Option<&TransformationPlan>) -> bool + Send,
    {
        let mut state = PollState::default();
        let exit = self
            .poll_loop(job_id, fail_on, cancel, &mut state, &mut on_change, &mut done)
            .await;

        let exit = match exit {
            Ok(()) => return Ok(state.into_result(PollOutcome::Succeeded)),
            Err(exit) => exit,
        };

        if !cancel.is_cancelled() {
            on_change(state.status(), JobStatus::Failed, state.plan.as_ref());
        }

        match exit {
            LoopExit::FailedStatus => {
                tracing::info!(job_id = %job_id, status = ?state.final_status, "job reached failure status");
                Ok(state.into_result(PollOutcome::FailedStatus))
            }
            LoopExit::AccessDenied(err) => {
                tracing::error!(job_id = %job_id, error = %err, "giving up polling, credentials could not be refreshed");
                Ok(state.into_result(PollOutcome::AccessDenied))
            }
            LoopExit::Error(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "polling aborted");
                Err(err)
            }
        }
    }

    async fn poll_loop<F, D>(
        &self,
        job_id: &JobId,
        fail_on: &[JobStatus],
        cancel: &CancellationToken,
        state: &mut PollState,
        on_change: &mut F,
        done: &mut D,
    ) -> Result<(), LoopExit>
    where
        F: FnMut(JobStatus, JobStatus, Option<&TransformationPlan>) + Send,
        D: FnMut(JobStatus, Option<&TransformationPlan>) -> bool + Send,
    {
        let started = Instant::now();
        pause(self.settings.initial_delay, cancel).await;

        loop {
            if cancel.is_cancelled() {
                return Err(LoopExit::Error(TransformError::Disposed));
            }
            if started.elapsed() >= self.settings.max_duration {
                return Err(LoopExit::Error(TransformError::Timeout(job_id.to_string())));
            }

            let observed = self.poll_once(job_id, fail_on, cancel, state, on_change).await;
            pause(self.settings.poll_interval, cancel).await;

            match observed? {
                Some(status) if fail_on.contains(&status) => return Err(LoopExit::FailedStatus),
                Some(status) if done(status, state.plan.as_ref()) => return Ok(()),
                _ => {}
            }
        }
    }

    /// One status fetch. Returns `None` when the fetch was absorbed
    /// (throttling or a credential refresh).
    async fn poll_once<F>(
        &self,
        job_id: &JobId,
        fail_on: &[JobStatus],
        cancel: &CancellationToken,
        state: &mut PollState,
        on_change: &mut F,
    ) -> Result<Option<JobStatus>, LoopExit>
    where
        F: FnMut(JobStatus, JobStatus, Option<&TransformationPlan>) + Send,
    {
        let details = match self.client.get_job(job_id).await {
            Ok(details) => details,
            Err(err) if err.is_transient() => {
                tracing::debug!(job_id = %job_id, error = %err, "status fetch throttled");
                return Ok(None);
            }
            Err(err) if err.is_access_denied() => {
                if state.refreshes >= MAX_CREDENTIAL_REFRESHES {
                    return Err(LoopExit::AccessDenied(err));
                }
                state.refreshes += 1;
                tracing::warn!(job_id = %job_id, attempt = state.refreshes, "access denied, refreshing credentials");
                if let Err(refresh_err) = self.client.refresh_credentials().await {
                    tracing::warn!(job_id = %job_id, error = %refresh_err, "credential refresh failed");
                }
                return Ok(None);
            }
            Err(err) => return Err(LoopExit::Error(err)),
        };
        state.refreshes = 0;

        let status = details.status;
        tracing::debug!(job_id = %job_id, %status, "polled job status");
        state.details = Some(details);

        let plan = if status.has_plan() {
            pause(PLAN_SETTLE_DELAY, cancel).await;
            match self.client.get_plan(job_id).await {
                Ok(plan) => Some(plan),
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "plan fetch failed, keeping previous plan");
                    state.plan.clone()
                }
            }
        } else {
            None
        };

        if fail_on.contains(&status) {
            state.final_status = Some(status);
            return Ok(Some(status));
        }

        let previous = state.status();
        if state.status != Some(status) || plan != state.plan {
            if cancel.is_cancelled() {
                return Err(LoopExit::Error(TransformError::Disposed));
            }
            if previous != status {
                tracing::info!(job_id = %job_id, from = %previous, to = %status, "job status changed");
            }
            on_change(previous, status, plan.as_ref());
            state.plan = plan;
        }
        state.status = Some(status);
        Ok(Some(status))
    }
}

/// Sleep for `duration`, waking early if `cancel` fires.
async fn pause(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockClient, Scripted, sample_plan};

    const SUCCEED: &[JobStatus] = &[JobStatus::Completed];
    const FAIL: &[JobStatus] = &[JobStatus::Failed, JobStatus::Stopped];

    fn poller(client: &Arc<MockClient>) -> JobPoller {
        let settings = PollSettings::new(Duration::from_millis(100), Duration::from_millis(50))
            .with_max_duration(Duration::from_secs(3600));
        JobPoller::new(client.clone(), settings)
    }

    type Seen = Vec<(JobStatus, JobStatus, Option<TransformationPlan>)>;

    async fn run(
        client: &Arc<MockClient>,
        cancel: &CancellationToken,
    ) -> (TransformResult<PollingResult>, Seen) {
        let mut seen = Vec::new();
        let result = poller(client)
            .poll(&JobId::new("job-1"), SUCCEED, FAIL, cancel, |prev, curr, plan| {
                seen.push((prev, curr, plan.cloned()))
            })
            .await;
        (result, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_change_fires_once_per_distinct_status() {
        let client = Arc::new(MockClient::with_statuses([
            JobStatus::Started,
            JobStatus::Started,
            JobStatus::Preparing,
            JobStatus::Preparing,
            JobStatus::Planning,
            JobStatus::Completed,
        ]));

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        let result = result.unwrap();

        assert!(result.succeeded);
        assert_eq!(result.outcome, PollOutcome::Succeeded);
        assert_eq!(result.status, JobStatus::Completed);
        let transitions: Vec<_> = seen.iter().map(|(p, c, _)| (*p, *c)).collect();
        assert_eq!(
            transitions,
            vec![
                (JobStatus::Unknown, JobStatus::Started),
                (JobStatus::Started, JobStatus::Preparing),
                (JobStatus::Preparing, JobStatus::Planning),
                (JobStatus::Planning, JobStatus::Completed),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_change_without_status_change_is_reported() {
        let client = Arc::new(MockClient::with_statuses([
            JobStatus::Transforming,
            JobStatus::Transforming,
            JobStatus::Transforming,
            JobStatus::Completed,
        ]));
        client.set_plans(vec![sample_plan(0), sample_plan(1), sample_plan(1), sample_plan(2)]);

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        assert!(result.unwrap().succeeded);

        let transforming: Vec<_> = seen
            .iter()
            .filter(|(_, c, _)| *c == JobStatus::Transforming)
            .collect();
        assert_eq!(transforming.len(), 2);
        assert_eq!(transforming[0].2, Some(sample_plan(0)));
        assert_eq!(transforming[1].0, JobStatus::Transforming);
        assert_eq!(transforming[1].2, Some(sample_plan(1)));
        assert_eq!(seen.last().unwrap().1, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_fires_final_failed_change() {
        let client = Arc::new(MockClient::with_statuses([
            JobStatus::Started,
            JobStatus::Transforming,
            JobStatus::Failed,
        ]));

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        let result = result.unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.outcome, PollOutcome::FailedStatus);
        assert_eq!(result.status, JobStatus::Failed);
        let failed: Vec<_> = seen.iter().filter(|(_, c, _)| *c == JobStatus::Failed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, JobStatus::Transforming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_is_retried_silently() {
        let client = Arc::new(MockClient::new(vec![
            Scripted::Status(JobStatus::Started),
            Scripted::Throttled,
            Scripted::Throttled,
            Scripted::Status(JobStatus::Completed),
        ]));

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        assert!(result.unwrap().succeeded);
        assert_eq!(seen.len(), 2);
        assert_eq!(client.get_job_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied_within_cap_is_absorbed() {
        let mut script = vec![Scripted::Status(JobStatus::Started)];
        script.extend(std::iter::repeat_n(Scripted::AccessDenied, 10));
        script.push(Scripted::Status(JobStatus::Completed));
        let client = Arc::new(MockClient::new(script));

        let (result, _) = run(&client, &CancellationToken::new()).await;
        assert!(result.unwrap().succeeded);
        assert_eq!(client.refresh_calls(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied_over_cap_gives_up() {
        let mut script = vec![Scripted::Status(JobStatus::Started)];
        script.extend(std::iter::repeat_n(Scripted::AccessDenied, 11));
        script.push(Scripted::Status(JobStatus::Completed));
        let client = Arc::new(MockClient::new(script));

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        let result = result.unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.outcome, PollOutcome::AccessDenied);
        assert_eq!(client.refresh_calls(), 10);
        assert_eq!(seen.last().unwrap().1, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_budget_resets_after_success() {
        let mut script = vec![Scripted::Status(JobStatus::Started)];
        script.extend(std::iter::repeat_n(Scripted::AccessDenied, 8));
        script.push(Scripted::Status(JobStatus::Preparing));
        script.extend(std::iter::repeat_n(Scripted::AccessDenied, 8));
        script.push(Scripted::Status(JobStatus::Completed));
        let client = Arc::new(MockClient::new(script));

        let (result, _) = run(&client, &CancellationToken::new()).await;
        assert!(result.unwrap().succeeded);
        assert_eq!(client.refresh_calls(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_propagates() {
        let client = Arc::new(MockClient::new(vec![
            Scripted::Status(JobStatus::Started),
            Scripted::ServerError,
        ]));

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransformError::InternalServer(_))));
        assert_eq!(seen.last().unwrap().1, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_fetch_failure_keeps_polling() {
        let client = Arc::new(MockClient::with_statuses([
            JobStatus::Planned,
            JobStatus::Transforming,
            JobStatus::Completed,
        ]));
        client.set_plans(vec![sample_plan(0)]);
        client.fail_plan_fetches(true);

        let (result, seen) = run(&client, &CancellationToken::new()).await;
        assert!(result.unwrap().succeeded);
        assert!(seen.iter().all(|(_, _, plan)| plan.is_none()));
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_waits_for_the_plan_to_catch_up() {
        let client = Arc::new(MockClient::with_statuses([JobStatus::Paused]));
        client.set_plans(vec![sample_plan(2), sample_plan(2), sample_plan(3)]);

        let mut changes = 0;
        let result = poller(&client)
            .poll_until(
                &JobId::new("job-1"),
                FAIL,
                &CancellationToken::new(),
                |_, _, _| changes += 1,
                |status, plan| status == JobStatus::Paused && plan == Some(&sample_plan(3)),
            )
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.plan, Some(sample_plan(3)));
        assert_eq!(client.get_job_calls(), 3);
        assert_eq!(changes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_raises_disposed_without_final_change() {
        let client = Arc::new(MockClient::with_statuses([JobStatus::Transforming]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, seen) = run(&client, &cancel).await;
        assert!(matches!(result, Err(TransformError::Disposed)));
        assert!(seen.is_empty());
        assert_eq!(client.get_job_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_times_out() {
        let client = Arc::new(MockClient::with_statuses([JobStatus::Transforming]));
        let settings = PollSettings::new(Duration::from_millis(10), Duration::from_secs(60))
            .with_max_duration(Duration::from_secs(300));
        let poller = JobPoller::new(client.clone(), settings);

        let result = poller
            .poll(&JobId::new("job-1"), SUCCEED, FAIL, &CancellationToken::new(), |_, _, _| {})
            .await;
        assert!(matches!(result, Err(TransformError::Timeout(_))));
        assert!(client.get_job_calls() >= 4);
    }
}
