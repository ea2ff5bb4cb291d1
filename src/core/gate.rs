//! Step gating
//!
//! A gate is a precondition on a step expressed in terms of other steps'
//! recorded outcomes. Evaluation is pure: callers assemble a snapshot from
//! persisted records and get back either clearance or the first violation.

use crate::core::report::{PublishRecord, TestReport};
use crate::core::state::StepStatus;
use crate::core::step::{PipelineStep, StepName};
use thiserror::Error;

/// Why a step may not run yet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateViolation {
    #[error("prerequisite step '{step}' is {status}, expected success or skipped")]
    PrerequisiteUnmet { step: StepName, status: StepStatus },

    #[error("prerequisite step '{0}' has no record for this project")]
    PrerequisiteMissing(StepName),

    #[error("no local test report has been recorded")]
    NoLocalReport,

    #[error("latest local test report did not pass ({failed} failed, status {status})")]
    LocalTestNotPassed { failed: u32, status: String },

    #[error("no marketplace listing has been published")]
    NoMarketplaceListing,
}

/// Recorded state a gate is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct GateSnapshot<'a> {
    pub steps: &'a [PipelineStep],
    pub latest_local_report: Option<&'a TestReport>,
    pub publish_records: &'a [PublishRecord],
}

/// Check whether `step` may run given the snapshot
pub fn evaluate(step: StepName, snapshot: &GateSnapshot<'_>) -> Result<(), GateViolation> {
    for prereq in step.prerequisites() {
        let record = snapshot
            .steps
            .iter()
            .find(|s| s.name == *prereq)
            .ok_or(GateViolation::PrerequisiteMissing(*prereq))?;
        if !record.status.satisfies_prerequisite() {
            return Err(GateViolation::PrerequisiteUnmet {
                step: *prereq,
                status: record.status,
            });
        }
    }

    if step.is_marketplace() {
        let report = snapshot
            .latest_local_report
            .ok_or(GateViolation::NoLocalReport)?;
        if !report.passed_cleanly() {
            return Err(GateViolation::LocalTestNotPassed {
                failed: report.failed,
                status: report.status.as_str().to_string(),
            });
        }
    }

    if step == StepName::OnlineTest {
        let listed = snapshot
            .publish_records
            .iter()
            .filter_map(|r| r.target_step())
            .any(|t| t.is_marketplace());
        if !listed {
            return Err(GateViolation::NoMarketplaceListing);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::{ReportStatus, TestType};
    use uuid::Uuid;

    fn steps_with(statuses: &[(StepName, StepStatus)]) -> Vec<PipelineStep> {
        let id = Uuid::new_v4();
        let mut steps = PipelineStep::full_set(id);
        for (name, status) in statuses {
            if let Some(s) = steps.iter_mut().find(|s| s.name == *name) {
                s.status = *status;
            }
        }
        steps
    }

    fn upstream_done() -> Vec<PipelineStep> {
        steps_with(&[
            (StepName::Crawl, StepStatus::Skipped),
            (StepName::Convert, StepStatus::Skipped),
            (StepName::Github, StepStatus::Success),
            (StepName::Pypi, StepStatus::Success),
            (StepName::LocalTest, StepStatus::Success),
        ])
    }

    #[test]
    fn test_first_step_has_no_gate() {
        let steps = steps_with(&[]);
        let snapshot = GateSnapshot {
            steps: &steps,
            latest_local_report: None,
            publish_records: &[],
        };
        assert_eq!(evaluate(StepName::Crawl, &snapshot), Ok(()));
    }

    #[test]
    fn test_pending_prerequisite_blocks() {
        let steps = steps_with(&[(StepName::Crawl, StepStatus::Success)]);
        let snapshot = GateSnapshot {
            steps: &steps,
            latest_local_report: None,
            publish_records: &[],
        };
        assert_eq!(
            evaluate(StepName::Github, &snapshot),
            Err(GateViolation::PrerequisiteUnmet {
                step: StepName::Convert,
                status: StepStatus::Pending
            })
        );
    }

    #[test]
    fn test_marketplace_requires_clean_local_report() {
        let steps = upstream_done();
        let id = steps[0].project_id;
        let clean = TestReport::new(id, TestType::Local, ReportStatus::Success).with_counts(4, 0, 0);
        let dirty = TestReport::new(id, TestType::Local, ReportStatus::Success).with_counts(2, 2, 0);

        let ok = GateSnapshot {
            steps: &steps,
            latest_local_report: Some(&clean),
            publish_records: &[],
        };
        assert_eq!(evaluate(StepName::Emcp, &ok), Ok(()));

        let blocked = GateSnapshot {
            latest_local_report: Some(&dirty),
            ..ok
        };
        assert!(matches!(
            evaluate(StepName::Emcp, &blocked),
            Err(GateViolation::LocalTestNotPassed { failed: 2, .. })
        ));

        let missing = GateSnapshot {
            latest_local_report: None,
            ..ok
        };
        assert_eq!(
            evaluate(StepName::Emcp, &missing),
            Err(GateViolation::NoLocalReport)
        );
    }

    #[test]
    fn test_online_test_requires_marketplace_record() {
        let mut steps = upstream_done();
        for s in steps.iter_mut() {
            if s.name.is_marketplace() {
                s.status = StepStatus::Success;
            }
        }
        let id = steps[0].project_id;
        let clean = TestReport::new(id, TestType::Local, ReportStatus::Success);
        let github_only = vec![PublishRecord::new(id, StepName::Github)];
        let snapshot = GateSnapshot {
            steps: &steps,
            latest_local_report: Some(&clean),
            publish_records: &github_only,
        };
        assert_eq!(
            evaluate(StepName::OnlineTest, &snapshot),
            Err(GateViolation::NoMarketplaceListing)
        );

        let listed = vec![PublishRecord::new(id, StepName::Emcp)];
        let snapshot = GateSnapshot {
            publish_records: &listed,
            ..snapshot
        };
        assert_eq!(evaluate(StepName::OnlineTest, &snapshot), Ok(()));
    }
}
