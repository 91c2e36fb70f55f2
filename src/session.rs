//! Session context and local precondition checks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Build file name the remote service accepts.
pub const SUPPORTED_BUILD_FILE: &str = "pom.xml";

/// Java language level of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JavaVersion {
    #[serde(rename = "JAVA_8")]
    Jdk8,
    #[serde(rename = "JAVA_11")]
    Jdk11,
    #[serde(rename = "JAVA_17")]
    Jdk17,
    #[serde(rename = "JAVA_21")]
    Jdk21,
}

impl JavaVersion {
    /// Target versions a project at this version can be migrated to.
    pub fn supported_targets(&self) -> &'static [JavaVersion] {
        match self {
            JavaVersion::Jdk8 | JavaVersion::Jdk11 => &[JavaVersion::Jdk17],
            JavaVersion::Jdk17 => &[JavaVersion::Jdk21],
            JavaVersion::Jdk21 => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            JavaVersion::Jdk8 => "JDK 8",
            JavaVersion::Jdk11 => "JDK 11",
            JavaVersion::Jdk17 => "JDK 17",
            JavaVersion::Jdk21 => "JDK 21",
        }
    }
}

impl std::fmt::Display for JavaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Everything the orchestrator needs to know about the project under
/// migration. Fixed for the lifetime of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Root directory of the owning project.
    pub project: PathBuf,
    /// Build file being migrated.
    pub config_file: PathBuf,
    pub source_version: JavaVersion,
    pub target_version: JavaVersion,
}

impl SessionContext {
    pub fn new(
        project: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        source_version: JavaVersion,
        target_version: JavaVersion,
    ) -> Self {
        Self {
            project: project.into(),
            config_file: config_file.into(),
            source_version,
            target_version,
        }
    }

    /// Display name of the module owning the build file, falling back to
    /// the project directory name.
    pub fn module_name(&self) -> String {
        self.config_file
            .parent()
            .and_then(Path::file_name)
            .or_else(|| self.project.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Check local preconditions before any remote call is made.
    pub fn validate(&self) -> ValidationResult {
        if self.project.as_os_str().is_empty() {
            return ValidationResult::invalid("project has no content root");
        }

        let file_name = self.config_file.file_name().and_then(|n| n.to_str());
        if file_name != Some(SUPPORTED_BUILD_FILE) {
            return ValidationResult::invalid(format!(
                "no supported build file found, expected {SUPPORTED_BUILD_FILE}"
            ));
        }

        if !self.source_version.supported_targets().contains(&self.target_version) {
            return ValidationResult::invalid(format!(
                "migrating from {} to {} is not supported",
                self.source_version, self.target_version
            ));
        }

        ValidationResult::valid()
    }
}

/// Outcome of a local precondition check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}
