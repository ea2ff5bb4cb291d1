//! Step execution seam - what the engine calls to run one step body

use crate::core::{GateViolation, PublishRecord, StepContext, StepName, TestReport};
use serde_json::Value;
use thiserror::Error;

/// What a successful step body hands back for the engine to persist
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Stored as the step's result payload
    pub data: Value,
    pub publish: Option<PublishRecord>,
    pub reports: Vec<TestReport>,
}

impl StepOutcome {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            publish: None,
            reports: Vec::new(),
        }
    }

    pub fn with_publish(mut self, record: PublishRecord) -> Self {
        self.publish = Some(record);
        self
    }

    pub fn with_report(mut self, report: TestReport) -> Self {
        self.reports.push(report);
        self
    }
}

/// A failed step body. Reports gathered before the failure are still kept.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StepError {
    pub message: String,
    pub reports: Vec<TestReport>,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reports: Vec::new(),
        }
    }

    pub fn with_reports(mut self, reports: Vec<TestReport>) -> Self {
        self.reports = reports;
        self
    }
}

impl From<anyhow::Error> for StepError {
    fn from(e: anyhow::Error) -> Self {
        StepError::new(format!("{:#}", e))
    }
}

/// Why a pipeline stopped at a step
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepFailure {
    /// Recoverable: satisfy the gate, then run from this step again
    #[error("gate not satisfied for '{step}': {violation}")]
    GateNotSatisfied {
        step: StepName,
        violation: GateViolation,
    },

    #[error("step '{step}' failed: {message}")]
    Execution { step: StepName, message: String },

    #[error("step '{step}' not run because '{after}' failed")]
    Aborted { step: StepName, after: StepName },
}

impl StepFailure {
    pub fn step(&self) -> StepName {
        match self {
            StepFailure::GateNotSatisfied { step, .. }
            | StepFailure::Execution { step, .. }
            | StepFailure::Aborted { step, .. } => *step,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepFailure::GateNotSatisfied { .. } => "gate-not-satisfied",
            StepFailure::Execution { .. } => "execution-error",
            StepFailure::Aborted { .. } => "aborted",
        }
    }
}

/// Runs the body of a single step
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: StepName, ctx: &StepContext) -> Result<StepOutcome, StepError>;
}
