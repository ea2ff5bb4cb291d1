//! Execution scheduler - decides which steps a run touches

use crate::core::{PipelineStep, StepName, StepStatus};

/// Step changes made before a run starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePlan {
    /// Earlier non-success steps marked skipped
    pub skipped: Vec<StepName>,
    /// Non-success steps from the start point on, put back to pending
    pub reset: Vec<StepName>,
}

impl ResumePlan {
    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty() && self.reset.is_empty()
    }
}

/// Prepare `steps` for a run starting at `from`.
///
/// With an explicit start, steps before it that did not succeed are skipped
/// and steps from it on that did not succeed go back to pending. Without
/// one, the run resumes where it stopped: failed and interrupted steps go
/// back to pending and earlier skips stand. Successful steps are left alone
/// everywhere.
pub fn plan_resume(steps: &mut [PipelineStep], from: Option<StepName>) -> ResumePlan {
    let start = from.map(|s| s.order()).unwrap_or(1);
    let mut plan = ResumePlan::default();

    for step in steps.iter_mut() {
        if step.status == StepStatus::Success {
            continue;
        }
        if from.is_none() && step.status == StepStatus::Skipped {
            continue;
        }
        if step.order < start {
            if step.status != StepStatus::Skipped {
                step.skip(format!("run started at {}", from.map(|s| s.as_str()).unwrap_or("")));
                plan.skipped.push(step.name);
            }
        } else if step.status != StepStatus::Pending {
            step.reset();
            plan.reset.push(step.name);
        }
    }

    plan
}

/// Pending steps in execution order
pub fn pending_in_order(steps: &[PipelineStep]) -> Vec<StepName> {
    let mut pending: Vec<&PipelineStep> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .collect();
    pending.sort_by_key(|s| s.order);
    pending.into_iter().map(|s| s.name).collect()
}
