//! Deployment stages and their reported status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// A named phase of the deployment pipeline.
///
/// The six well-known stages are a convention shared with the frontend,
/// not an enforced set: any other name is carried through as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    RepoClone,
    CodeAnalysis,
    DockerfileGeneration,
    SecurityScan,
    ContainerBuild,
    CloudDeployment,

    /// Custom or unknown stage name
    Other(String),
}

impl Stage {
    /// The standard stages in pipeline order.
    pub const STANDARD: [Stage; 6] = [
        Stage::RepoClone,
        Stage::CodeAnalysis,
        Stage::DockerfileGeneration,
        Stage::SecurityScan,
        Stage::ContainerBuild,
        Stage::CloudDeployment,
    ];

    /// Returns the wire identifier for this stage.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RepoClone => "repo_clone",
            Self::CodeAnalysis => "code_analysis",
            Self::DockerfileGeneration => "dockerfile_generation",
            Self::SecurityScan => "security_scan",
            Self::ContainerBuild => "container_build",
            Self::CloudDeployment => "cloud_deployment",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Returns a descriptive label for display.
    pub fn label(&self) -> &str {
        match self {
            Self::RepoClone => "Clone repository",
            Self::CodeAnalysis => "Analyze code",
            Self::DockerfileGeneration => "Generate Dockerfile",
            Self::SecurityScan => "Security scan",
            Self::ContainerBuild => "Build container",
            Self::CloudDeployment => "Deploy",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Parses a stage from its wire identifier.
    pub fn from_name(name: &str) -> Self {
        match name {
            "repo_clone" => Self::RepoClone,
            "code_analysis" => Self::CodeAnalysis,
            "dockerfile_generation" => Self::DockerfileGeneration,
            "security_scan" => Self::SecurityScan,
            "container_build" => Self::ContainerBuild,
            "cloud_deployment" => Self::CloudDeployment,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true for one of the six well-known stages.
    pub fn is_standard(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Stage {
    fn from(s: String) -> Self {
        Self::from_name(&s)
    }
}

impl From<&str> for Stage {
    fn from(s: &str) -> Self {
        Self::from_name(s)
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Status reported for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    InProgress,
    Success,
    Error,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Returns true if the stage has finished (either way).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-progress" => Ok(Self::InProgress),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(DomainError::InvalidStatus {
                value: other.to_string(),
            }),
        }
    }
}
