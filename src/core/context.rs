//! Step context - what a step body gets to see

use crate::core::project::Project;
use crate::core::report::{PublishRecord, TestReport};
use crate::core::step::{PipelineStep, StepName};
use serde_json::Value;

/// Read-only view of a project handed to a step body
///
/// Step bodies never write records themselves; they return an outcome and
/// the engine persists it.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub project: Project,
    pub steps: Vec<PipelineStep>,
    pub publish_records: Vec<PublishRecord>,
    pub latest_local_report: Option<TestReport>,
}

impl StepContext {
    /// Result payload of an earlier step, if it succeeded
    pub fn step_result(&self, step: StepName) -> Option<&Value> {
        self.steps
            .iter()
            .find(|s| s.name == step)
            .and_then(|s| s.result.as_ref())
    }

    /// Publish records for a given target
    pub fn records_for(&self, target: StepName) -> impl Iterator<Item = &PublishRecord> {
        self.publish_records
            .iter()
            .filter(move |r| r.target == target.as_str())
    }

    /// Marketplace listings recorded so far, in publish order
    pub fn marketplace_records(&self) -> Vec<&PublishRecord> {
        self.publish_records
            .iter()
            .filter(|r| r.target_step().map(|t| t.is_marketplace()).unwrap_or(false))
            .collect()
    }
}
