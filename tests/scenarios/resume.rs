//! Test: resuming and starting part-way through the pipeline

use crate::helpers::*;
use mcp_factory::core::{ProjectStatus, StepName, StepStatus};
use mcp_factory::execution::ExecutionEvent;
use mcp_factory::persistence::PipelineStore;

/// After a fix, a plain rerun picks up at the failed step
#[tokio::test]
async fn test_rerun_resumes_at_failed_step() {
    let h = harness();
    h.runner.fail_on(Some(StepName::Github));
    let id = new_project(&h).await;
    h.engine.run(id, None).await.unwrap();

    h.runner.fail_on(None);
    h.runner.clear();
    let summary = h.engine.run(id, None).await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.executed.first(), Some(&StepName::Github));
    assert!(!h.runner.ran().contains(&StepName::Crawl));
    assert_eq!(summary.status, ProjectStatus::Completed);
}

/// Starting at pypi skips the unfinished earlier steps and still completes
#[tokio::test]
async fn test_start_from_later_step() {
    let h = harness();
    let id = new_project(&h).await;

    let summary = h.engine.run(id, Some(StepName::Pypi)).await.unwrap();

    assert_eq!(h.runner.ran()[0], StepName::Pypi);
    assert_eq!(summary.status, ProjectStatus::Completed);
    let after = statuses(&h.store, id).await;
    assert_eq!(&after[..3], &[StepStatus::Skipped; 3]);
    assert!(after[3..].iter().all(|s| *s == StepStatus::Success));

    let steps = h.store.get_steps(id).await.unwrap();
    assert_eq!(
        steps[0].result.as_ref().unwrap()["skipped"],
        "run started at pypi"
    );

    let events = h.events.lock().unwrap();
    let skipped = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepSkipped { .. }))
        .count();
    assert_eq!(skipped, 3);
}

/// Successful steps are never re-run, even before the start point
#[tokio::test]
async fn test_successful_steps_are_left_alone() {
    let h = harness();
    let id = new_project(&h).await;
    set_statuses(
        &h.store,
        id,
        &[
            (StepName::Crawl, StepStatus::Success),
            (StepName::Convert, StepStatus::Failed),
        ],
    )
    .await;

    h.engine.run(id, Some(StepName::Github)).await.unwrap();

    let after = statuses(&h.store, id).await;
    assert_eq!(after[0], StepStatus::Success);
    assert_eq!(after[1], StepStatus::Skipped);
    assert!(!h.runner.ran().contains(&StepName::Crawl));
    assert!(!h.runner.ran().contains(&StepName::Convert));
}

/// Running one step again replaces its earlier outcome
#[tokio::test]
async fn test_single_step_rerun_replaces_failure() {
    let h = harness();
    h.runner.fail_on(Some(StepName::Crawl));
    let id = new_project(&h).await;
    let summary = h.engine.run_step(id, StepName::Crawl).await.unwrap();
    assert!(!summary.succeeded());
    assert_eq!(summary.status, ProjectStatus::Failed);

    h.runner.fail_on(None);
    let summary = h.engine.run_step(id, StepName::Crawl).await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.status, ProjectStatus::Crawled);
    let steps = h.store.get_steps(id).await.unwrap();
    assert_eq!(steps[0].status, StepStatus::Success);
    assert!(steps[0].error.is_none());
}

/// Steps skipped by an earlier start point stay skipped on a plain rerun
#[tokio::test]
async fn test_rerun_keeps_steps_skipped_by_start_point() {
    let h = harness();
    h.runner.fail_on(Some(StepName::Pypi));
    let id = new_project(&h).await;
    h.engine.run(id, Some(StepName::Github)).await.unwrap();
    assert_eq!(
        &statuses(&h.store, id).await[..4],
        &[
            StepStatus::Skipped,
            StepStatus::Skipped,
            StepStatus::Success,
            StepStatus::Failed
        ]
    );

    h.runner.fail_on(None);
    h.runner.clear();
    let summary = h.engine.run(id, None).await.unwrap();

    assert_eq!(h.runner.ran(), StepName::ALL[3..].to_vec());
    assert_eq!(summary.status, ProjectStatus::Completed);
    let after = statuses(&h.store, id).await;
    assert_eq!(&after[..2], &[StepStatus::Skipped; 2]);
}
