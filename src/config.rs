//! Orchestrator configuration.
//!
//! Loaded from TOML; every field has a default, so an empty file is a
//! valid configuration. Environment overrides are applied separately via
//! [`OrchestratorConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::persistence::{JsonFilePersistence, MemoryPersistence, SessionPersistence};
use crate::poller::PollSettings;

pub const ENV_POLL_INTERVAL_MS: &str = "TRANSFORM_POLL_INTERVAL_MS";
pub const ENV_INITIAL_DELAY_MS: &str = "TRANSFORM_INITIAL_DELAY_MS";
pub const ENV_MAX_POLL_SECS: &str = "TRANSFORM_MAX_POLL_SECS";
pub const ENV_ARTIFACT_DIR: &str = "TRANSFORM_ARTIFACT_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Delay before the first status fetch of a job.
    pub initial_poll_delay_ms: u64,
    /// Delay between status fetches.
    pub poll_interval_ms: u64,
    pub max_poll_duration_secs: u64,
    /// Where downloaded archives are written.
    pub artifact_dir: PathBuf,
    /// Session record file; `None` keeps the record in memory.
    pub state_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            initial_poll_delay_ms: 10_000,
            poll_interval_ms: 5_000,
            max_poll_duration_secs: 604_800,
            artifact_dir: std::env::temp_dir().join("transform-artifacts"),
            state_file: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(content: &str) -> TransformResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TransformError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> TransformResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransformError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `TRANSFORM_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> TransformResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> TransformResult<()> {
        let parse = |key: &str| -> TransformResult<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|e| TransformError::Config(format!("{key}={raw}: {e}")))
                })
                .transpose()
        };

        if let Some(ms) = parse(ENV_POLL_INTERVAL_MS)? {
            self.poll_interval_ms = ms;
        }
        if let Some(ms) = parse(ENV_INITIAL_DELAY_MS)? {
            self.initial_poll_delay_ms = ms;
        }
        if let Some(secs) = parse(ENV_MAX_POLL_SECS)? {
            self.max_poll_duration_secs = secs;
        }
        if let Some(dir) = lookup(ENV_ARTIFACT_DIR) {
            self.artifact_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    pub fn validate(&self) -> TransformResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(TransformError::Config("poll_interval_ms cannot be 0".into()));
        }
        if self.max_poll_duration_secs == 0 {
            return Err(TransformError::Config(
                "max_poll_duration_secs cannot be 0".into(),
            ));
        }
        if self.artifact_dir.as_os_str().is_empty() {
            return Err(TransformError::Config("artifact_dir cannot be empty".into()));
        }
        Ok(())
    }

    /// Session store for this configuration: a JSON file when
    /// `state_file` is set, memory otherwise.
    pub fn session_persistence(&self) -> Arc<dyn SessionPersistence> {
        match &self.state_file {
            Some(path) => Arc::new(JsonFilePersistence::new(path.clone())),
            None => Arc::new(MemoryPersistence::default()),
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.initial_poll_delay_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
        .with_max_duration(Duration::from_secs(self.max_poll_duration_secs))
    }
}
