//! Test: failure handling - a failed step stops the run

use crate::helpers::*;
use mcp_factory::core::{LogLevel, ProjectStatus, StepName, StepStatus};
use mcp_factory::execution::{ExecutionEvent, StepFailure};
use mcp_factory::persistence::PipelineStore;

/// Whichever step fails, the steps that ran are a prefix of the declared order
#[tokio::test]
async fn test_executed_steps_form_a_prefix() {
    for (index, failing) in StepName::ALL.iter().enumerate() {
        let h = harness();
        h.runner.fail_on(Some(*failing));
        let id = new_project(&h).await;

        let summary = h.engine.run(id, None).await.unwrap();

        assert_eq!(h.runner.ran(), StepName::ALL[..=index].to_vec(), "failing {}", failing);
        assert_eq!(summary.status, ProjectStatus::Failed);
        assert_eq!(summary.aborted, StepName::ALL[index + 1..].to_vec());

        let after = statuses(&h.store, id).await;
        assert!(after[..index].iter().all(|s| *s == StepStatus::Success));
        assert_eq!(after[index], StepStatus::Failed);
        assert!(after[index + 1..].iter().all(|s| *s == StepStatus::Pending));
    }
}

/// Completed steps and their records survive a later failure
#[tokio::test]
async fn test_partial_progress_is_kept() {
    let h = harness();
    h.runner.fail_on(Some(StepName::Emcp));
    let id = new_project(&h).await;

    let summary = h.engine.run(id, None).await.unwrap();

    match &summary.failure {
        Some(StepFailure::Execution { step, message }) => {
            assert_eq!(*step, StepName::Emcp);
            assert!(message.contains("exited with code 1"));
        }
        other => panic!("expected execution error, got {:?}", other),
    }

    let records = h.store.list_publish_records(id).await.unwrap();
    let targets: Vec<&str> = records.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(targets, vec!["github", "pypi"]);
    assert_eq!(h.store.list_test_reports(id).await.unwrap().len(), 1);

    let steps = h.store.get_steps(id).await.unwrap();
    let emcp = &steps[5];
    assert!(emcp.started_at.is_some());
    assert!(emcp.ended_at.is_some());
    assert!(emcp.error.as_deref().unwrap_or_default().contains("emcp"));
}

/// The failure shows up in the operation log and the event stream
#[tokio::test]
async fn test_failure_is_logged_and_broadcast() {
    let h = harness();
    h.runner.fail_on(Some(StepName::Convert));
    let id = new_project(&h).await;

    h.engine.run(id, None).await.unwrap();

    let logs = h.store.list_logs(id, 50).await.unwrap();
    let errors: Vec<_> = logs.iter().filter(|l| l.level == LogLevel::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].step, Some(StepName::Convert));

    let events = h.events.lock().unwrap();
    let aborted = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::StepAborted { after: StepName::Convert, .. }))
        .count();
    assert_eq!(aborted, 7);
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::ProjectFinished {
            status: ProjectStatus::Failed,
            ..
        })
    ));
}

/// A panicking observer never takes the pipeline down
#[tokio::test]
async fn test_broken_observer_is_ignored() {
    let mut h = harness();
    h.engine.add_event_handler(|event| {
        if let ExecutionEvent::StepStarted { step: StepName::Github } = event {
            panic!("display crashed");
        }
    });
    let id = new_project(&h).await;

    let summary = h.engine.run(id, None).await.unwrap();

    assert!(summary.succeeded());
    assert_eq!(summary.status, ProjectStatus::Completed);
    assert_eq!(h.runner.ran().len(), StepName::ALL.len());
}
