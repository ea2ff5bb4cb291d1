//! Status models for projects and steps

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a single pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet attempted
    Pending,
    /// Currently executing
    Running,
    /// Finished and produced a result
    Success,
    /// Execution or gate check failed
    Failed,
    /// Deliberately not run (resumed past it)
    Skipped,
}

impl StepStatus {
    /// Whether a later step may depend on this one
    pub fn satisfies_prerequisite(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Skipped)
    }

    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Success | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => StepStatus::Pending,
            "running" => StepStatus::Running,
            "success" => StepStatus::Success,
            "failed" => StepStatus::Failed,
            "skipped" => StepStatus::Skipped,
            other => anyhow::bail!("unknown step status '{}'", other),
        })
    }
}

/// Aggregate status of a project, advanced as milestones are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Crawled,
    Converted,
    Github,
    Pypi,
    Emcp,
    Platform,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 9] = [
        ProjectStatus::Created,
        ProjectStatus::Crawled,
        ProjectStatus::Converted,
        ProjectStatus::Github,
        ProjectStatus::Pypi,
        ProjectStatus::Emcp,
        ProjectStatus::Platform,
        ProjectStatus::Completed,
        ProjectStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Crawled => "crawled",
            ProjectStatus::Converted => "converted",
            ProjectStatus::Github => "github",
            ProjectStatus::Pypi => "pypi",
            ProjectStatus::Emcp => "emcp",
            ProjectStatus::Platform => "platform",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProjectStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown project status '{}'", s))
    }
}
