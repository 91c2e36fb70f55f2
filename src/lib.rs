//! Transform Orchestrator: lifecycle management for remote code-transformation jobs
//!
//! This crate drives a remote Java-version migration job from start to
//! finish: it packages and uploads a project, polls the remote job with an
//! initial delay, a fixed interval and a bounded duration, reacts to status
//! and plan changes (including a human-in-the-loop pause), persists enough
//! state to pick the job up again after a restart, and absorbs throttling
//! and expired credentials without losing track of the job.
//!
//! # Overview
//!
//! The crate defines:
//! - A [`RemoteJobClient`] trait for the transformation service and a
//!   [`ProjectPackager`] trait for the local build and zip
//! - [`JobPoller`] for the status loop and its change notifications
//! - [`JobStateMachine`] mapping every attempt onto one [`JobCompletedResult`]
//! - [`OrchestratorManager`], the single-job façade for the host UI
//! - [`SessionPersistence`] with JSON-file and in-memory stores
//! - [`TransformListener`] / [`Notification`] for fire-and-forget UI events
//! - [`TransformError`] with categorized error variants
//!
//! # Lifecycle
//!
//! ```text
//!   start() ──→ build + package ──→ start_job() ──→ poll ⟲ ──→ completion
//!                                                     │
//!                                       paused ──→ resume_paused()
//!
//!   resume() ──→ get_job() ──→ finished? notify : poll ⟲
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use transform_orchestrator::{OrchestratorConfig, OrchestratorManager, StartOutcome};
//!
//! let config = OrchestratorConfig::load("orchestrator.toml")?;
//! let manager = Arc::new(OrchestratorManager::new(
//!     &config,
//!     client,
//!     packager,
//!     config.session_persistence(),
//!     listener,
//! ));
//!
//! if let StartOutcome::Launched(handle) = manager.start(context) {
//!     let result = handle.await??;
//! }
//! ```

pub mod artifact;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod listener;
pub mod machine;
pub mod manager;
pub mod persistence;
pub mod plan;
pub mod poller;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use artifact::{ArchiveInspector, ArtifactStore, DownloadOutcome, TransformationSummary};
pub use client::{
    BuildResult, PackagingError, ProjectPackager, RemoteJobClient, StartJobRequest,
    UploadPayload, UserActionStatus,
};
pub use config::OrchestratorConfig;
pub use error::{TransformError, TransformResult};
pub use job::{JobDetails, JobId, JobStatus};
pub use listener::{NoopListener, Notification, TransformListener};
pub use machine::{JobCompletedResult, JobStateMachine, Phase};
pub use manager::{
    OrchestratorManager, OrchestratorSnapshot, PipelineHandle, ResumeOutcome, StartOutcome,
};
pub use persistence::{
    JsonFilePersistence, MemoryPersistence, PersistedContext, PersistedRecord, SessionPersistence,
};
pub use plan::{
    DownloadArtifact, HilArtifact, PlanStep, ProgressUpdate, StepStatus, TransformationPlan,
};
pub use poller::{JobPoller, PollOutcome, PollSettings, PollingResult};
pub use session::{JavaVersion, SessionContext, ValidationResult};
