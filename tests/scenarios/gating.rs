//! Test: marketplace gating on the latest local test report

use crate::helpers::*;
use mcp_factory::core::gate::{evaluate, GateSnapshot};
use mcp_factory::core::{GateViolation, ProjectStatus, StepName, StepStatus, TestType};
use mcp_factory::execution::{ExecutionEvent, StepFailure};
use mcp_factory::persistence::PipelineStore;

const UP_TO_LOCAL_TEST: [(StepName, StepStatus); 5] = [
    (StepName::Crawl, StepStatus::Skipped),
    (StepName::Convert, StepStatus::Skipped),
    (StepName::Github, StepStatus::Success),
    (StepName::Pypi, StepStatus::Success),
    (StepName::LocalTest, StepStatus::Success),
];

/// Skipped early steps and a clean local report clear the marketplace gate
#[tokio::test]
async fn test_clean_local_report_opens_marketplace() {
    let h = harness();
    let id = new_project(&h).await;
    set_statuses(&h.store, id, &UP_TO_LOCAL_TEST).await;
    h.store.add_test_report(&local_report(id, 0)).await.unwrap();

    let steps = h.store.get_steps(id).await.unwrap();
    let latest = h.store.latest_test_report(id, TestType::Local).await.unwrap();
    let snapshot = GateSnapshot {
        steps: &steps,
        latest_local_report: latest.as_ref(),
        publish_records: &[],
    };
    assert_eq!(evaluate(StepName::Emcp, &snapshot), Ok(()));

    let summary = h.engine.run_step(id, StepName::Emcp).await.unwrap();
    assert!(summary.succeeded());
    assert_eq!(h.runner.ran(), vec![StepName::Emcp]);
}

/// Two failing local tests keep the pipeline out of every marketplace
#[tokio::test]
async fn test_failing_local_report_blocks_marketplace() {
    let h = harness();
    let id = new_project(&h).await;
    set_statuses(&h.store, id, &UP_TO_LOCAL_TEST).await;
    h.store.add_test_report(&local_report(id, 2)).await.unwrap();

    let summary = h.engine.run_step(id, StepName::Emcp).await.unwrap();

    match summary.failure {
        Some(StepFailure::GateNotSatisfied { step, violation }) => {
            assert_eq!(step, StepName::Emcp);
            assert!(matches!(violation, GateViolation::LocalTestNotPassed { failed: 2, .. }));
        }
        other => panic!("expected gate-not-satisfied, got {:?}", other),
    }
    assert!(h.runner.ran().is_empty());

    // A full run from emcp stops at the same gate
    let summary = h.engine.run(id, Some(StepName::Emcp)).await.unwrap();
    assert_eq!(summary.executed, vec![StepName::Emcp]);
    assert!(h.runner.ran().is_empty());
    let after = statuses(&h.store, id).await;
    assert!(after[5..].iter().all(|s| *s == StepStatus::Pending));
}

/// Only the most recent local report counts
#[tokio::test]
async fn test_newer_passing_report_supersedes_failing_one() {
    let h = harness();
    let id = new_project(&h).await;
    set_statuses(&h.store, id, &UP_TO_LOCAL_TEST).await;
    h.store.add_test_report(&local_report(id, 3)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.store.add_test_report(&local_report(id, 0)).await.unwrap();

    assert!(h.store.has_passed_test(id, TestType::Local).await.unwrap());
    let summary = h.engine.run_step(id, StepName::Lobehub).await;
    // lobehub still needs emcp first
    assert!(matches!(
        summary.unwrap().failure,
        Some(StepFailure::GateNotSatisfied { step: StepName::Lobehub, .. })
    ));

    let summary = h.engine.run_step(id, StepName::Emcp).await.unwrap();
    assert!(summary.succeeded());
}

/// The local test step itself succeeds with failures; the next step is gated
#[tokio::test]
async fn test_full_run_stops_at_gate_after_failing_local_tests() {
    let h = harness();
    h.runner.local_failures(1);
    let id = new_project(&h).await;

    let summary = h.engine.run(id, None).await.unwrap();

    assert_eq!(
        h.runner.ran(),
        vec![
            StepName::Crawl,
            StepName::Convert,
            StepName::Github,
            StepName::Pypi,
            StepName::LocalTest
        ]
    );
    assert!(matches!(
        summary.failure,
        Some(StepFailure::GateNotSatisfied { step: StepName::Emcp, .. })
    ));
    assert!(!h.store.has_passed_test(id, TestType::Local).await.unwrap());

    let events = h.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepFailed { failure } if failure.kind() == "gate-not-satisfied")));
}

/// Online testing needs a marketplace listing, not just registry publishes
#[tokio::test]
async fn test_online_test_requires_marketplace_listing() {
    let h = harness();
    let id = new_project(&h).await;
    set_statuses(
        &h.store,
        id,
        &[
            (StepName::Crawl, StepStatus::Success),
            (StepName::Convert, StepStatus::Success),
            (StepName::Github, StepStatus::Success),
            (StepName::Pypi, StepStatus::Success),
            (StepName::LocalTest, StepStatus::Success),
            (StepName::Emcp, StepStatus::Skipped),
            (StepName::Lobehub, StepStatus::Skipped),
            (StepName::Mcpso, StepStatus::Skipped),
        ],
    )
    .await;

    let summary = h.engine.run_step(id, StepName::OnlineTest).await.unwrap();
    assert!(matches!(
        summary.failure,
        Some(StepFailure::GateNotSatisfied {
            violation: GateViolation::NoMarketplaceListing,
            ..
        })
    ));
}

/// A refused rerun of a finished step leaves its earlier success in place
#[tokio::test]
async fn test_refused_rerun_keeps_completed_project_consistent() {
    let h = harness();
    let id = new_project(&h).await;
    let summary = h.engine.run(id, None).await.unwrap();
    assert_eq!(summary.status, ProjectStatus::Completed);

    h.runner.local_failures(2);
    h.engine.run_step(id, StepName::LocalTest).await.unwrap();
    h.runner.clear();
    let summary = h.engine.run_step(id, StepName::Emcp).await.unwrap();

    assert!(matches!(
        summary.failure,
        Some(StepFailure::GateNotSatisfied { step: StepName::Emcp, .. })
    ));
    assert!(h.runner.ran().is_empty());
    let after = statuses(&h.store, id).await;
    assert!(after.iter().all(|s| *s == StepStatus::Success));
    assert_eq!(summary.status, ProjectStatus::Completed);
}

/// A completed project with an unfinished step falls back to its last milestone
#[tokio::test]
async fn test_completed_status_withdrawn_when_step_reopens() {
    let h = harness();
    let id = new_project(&h).await;
    h.engine.run(id, None).await.unwrap();

    set_statuses(&h.store, id, &[(StepName::Mcpso, StepStatus::Pending)]).await;
    h.store.add_test_report(&local_report(id, 1)).await.unwrap();
    let summary = h.engine.run_step(id, StepName::Mcpso).await.unwrap();

    assert!(matches!(
        summary.failure,
        Some(StepFailure::GateNotSatisfied { step: StepName::Mcpso, .. })
    ));
    assert_eq!(summary.status, ProjectStatus::Platform);
    let project = h.store.get_project(id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Platform);
}
