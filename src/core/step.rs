//! Step domain model
//!
//! The step set is fixed: every project carries the same nine stages in the
//! same order, and each stage depends on all stages before it.

use crate::core::state::{ProjectStatus, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Crawl,
    Convert,
    Github,
    Pypi,
    LocalTest,
    Emcp,
    Lobehub,
    Mcpso,
    OnlineTest,
}

impl StepName {
    /// All steps in execution order
    pub const ALL: [StepName; 9] = [
        StepName::Crawl,
        StepName::Convert,
        StepName::Github,
        StepName::Pypi,
        StepName::LocalTest,
        StepName::Emcp,
        StepName::Lobehub,
        StepName::Mcpso,
        StepName::OnlineTest,
    ];

    /// 1-based order index
    pub fn order(&self) -> u32 {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i as u32 + 1)
            .unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Crawl => "crawl",
            StepName::Convert => "convert",
            StepName::Github => "github",
            StepName::Pypi => "pypi",
            StepName::LocalTest => "local_test",
            StepName::Emcp => "emcp",
            StepName::Lobehub => "lobehub",
            StepName::Mcpso => "mcpso",
            StepName::OnlineTest => "online_test",
        }
    }

    /// Steps that must be success or skipped before this one may run
    pub fn prerequisites(&self) -> &'static [StepName] {
        let idx = (self.order() as usize).saturating_sub(1);
        &Self::ALL[..idx]
    }

    /// Marketplace listings are gated on a passing local test report
    pub fn is_marketplace(&self) -> bool {
        matches!(self, StepName::Emcp | StepName::Lobehub | StepName::Mcpso)
    }

    /// Steps whose body is an external collaborator rather than engine code
    pub fn is_collaborator_backed(&self) -> bool {
        !matches!(self, StepName::Emcp | StepName::OnlineTest)
    }

    /// Steps whose success produces a publish record
    pub fn publishes(&self) -> bool {
        matches!(
            self,
            StepName::Github | StepName::Pypi | StepName::Emcp | StepName::Lobehub | StepName::Mcpso
        )
    }

    /// Project status reached when this step succeeds
    pub fn milestone(&self) -> Option<ProjectStatus> {
        match self {
            StepName::Crawl => Some(ProjectStatus::Crawled),
            StepName::Convert => Some(ProjectStatus::Converted),
            StepName::Github => Some(ProjectStatus::Github),
            StepName::Pypi => Some(ProjectStatus::Pypi),
            StepName::Emcp => Some(ProjectStatus::Emcp),
            StepName::Lobehub | StepName::Mcpso => Some(ProjectStatus::Platform),
            StepName::LocalTest | StepName::OnlineTest => None,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown step '{}'", s))
    }
}

/// Persisted record of one stage for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub project_id: Uuid,
    pub name: StepName,
    pub order: u32,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Structured result returned by the step body
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl PipelineStep {
    pub fn new(project_id: Uuid, name: StepName) -> Self {
        Self {
            project_id,
            name,
            order: name.order(),
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        }
    }

    /// The full step set for a new project
    pub fn full_set(project_id: Uuid) -> Vec<PipelineStep> {
        StepName::ALL
            .iter()
            .map(|name| PipelineStep::new(project_id, *name))
            .collect()
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.ended_at = None;
        self.error = None;
    }

    pub fn succeed(&mut self, result: Value) {
        self.status = StepStatus::Success;
        self.ended_at = Some(Utc::now());
        self.result = Some(result);
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.ended_at = Some(Utc::now());
        self.error = None;
        self.result = Some(serde_json::json!({ "skipped": reason.into() }));
    }

    /// Back to pending, clearing timing and outcome
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.started_at = None;
        self.ended_at = None;
        self.result = None;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_one_based_and_monotonic() {
        let orders: Vec<u32> = StepName::ALL.iter().map(|s| s.order()).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_prerequisites_are_all_earlier_steps() {
        assert!(StepName::Crawl.prerequisites().is_empty());
        assert_eq!(
            StepName::Emcp.prerequisites(),
            &[
                StepName::Crawl,
                StepName::Convert,
                StepName::Github,
                StepName::Pypi,
                StepName::LocalTest
            ]
        );
        assert_eq!(StepName::OnlineTest.prerequisites().len(), 8);
    }

    #[test]
    fn test_name_round_trip_through_str() {
        for step in StepName::ALL {
            assert_eq!(step.as_str().parse::<StepName>().unwrap(), step);
        }
        assert!("deploy".parse::<StepName>().is_err());
    }

    #[test]
    fn test_skip_records_reason() {
        let mut step = PipelineStep::new(Uuid::new_v4(), StepName::Crawl);
        step.skip("resumed at github");
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.result.unwrap()["skipped"], "resumed at github");
    }
}
