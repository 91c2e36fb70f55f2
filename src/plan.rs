//! Transformation plan types.
//!
//! A plan is an ordered list of steps, each carrying an ordered list of
//! progress updates. The remote service refreshes the plan while the job
//! runs, so plan content can change while the job status stays the same.
//! Plans are compared structurally to detect those changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Status of a plan step or a progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Created,
    InProgress,
    Paused,
    Completed,
    Failed,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// Reference to a downloadable artifact attached to a progress update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadArtifact {
    pub artifact_id: String,
    pub artifact_type: String,
}

impl DownloadArtifact {
    pub fn new(artifact_id: impl Into<String>, artifact_type: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            artifact_type: artifact_type.into(),
        }
    }
}

/// One progress update within a plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub download_artifacts: Vec<DownloadArtifact>,
}

impl ProgressUpdate {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            status,
            start_time: None,
            end_time: None,
            download_artifacts: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_artifact(mut self, artifact: DownloadArtifact) -> Self {
        self.download_artifacts.push(artifact);
        self
    }

    pub fn with_times(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = Some(start);
        self.end_time = end;
        self
    }
}

/// One step of a transformation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status,
            start_time: None,
            end_time: None,
            progress_updates: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_update(mut self, update: ProgressUpdate) -> Self {
        self.progress_updates.push(update);
        self
    }
}

/// An ordered transformation plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationPlan {
    pub steps: Vec<PlanStep>,
}

impl TransformationPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// Find the step waiting on user input together with its artifact.
    ///
    /// A step is waiting when its latest progress update is paused and
    /// carries a download artifact. Earlier paused updates are history from
    /// a pause that was already resumed. The first such step in plan order
    /// wins.
    pub fn paused_artifact(&self) -> Option<(&PlanStep, &DownloadArtifact)> {
        self.steps.iter().find_map(|step| {
            step.progress_updates
                .last()
                .filter(|u| u.status == StepStatus::Paused)
                .and_then(|u| u.download_artifacts.first())
                .map(|artifact| (step, artifact))
        })
    }

    /// Number of completed steps and total number of steps.
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A downloadable artifact tied to a step paused for human input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HilArtifact {
    pub job_id: JobId,
    pub step_id: String,
    pub artifact_id: String,
    pub artifact_type: String,
}

impl HilArtifact {
    /// Extract the human-in-the-loop artifact from a plan, if any step is paused.
    pub fn from_plan(job_id: &JobId, plan: &TransformationPlan) -> Option<Self> {
        plan.paused_artifact().map(|(step, artifact)| Self {
            job_id: job_id.clone(),
            step_id: step.id.clone(),
            artifact_id: artifact.artifact_id.clone(),
            artifact_type: artifact.artifact_type.clone(),
        })
    }

    pub fn download_artifact(&self) -> DownloadArtifact {
        DownloadArtifact::new(&self.artifact_id, &self.artifact_type)
    }
}
