//! Main execution engine - orchestrates a project's pipeline run

use crate::core::gate::{self, GateSnapshot};
use crate::core::{
    LogLevel, OperationLog, PipelineStep, Project, ProjectStatus, StepContext, StepName,
    StepStatus, TestType,
};
use crate::execution::executor::{StepError, StepFailure, StepOutcome, StepRunner};
use crate::execution::scheduler::{pending_in_order, plan_resume};
use crate::persistence::PipelineStore;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    ProjectStarted {
        project_id: Uuid,
        project_name: String,
        from: Option<StepName>,
    },
    StepSkipped {
        step: StepName,
        reason: String,
    },
    StepStarted {
        step: StepName,
    },
    StepSucceeded {
        step: StepName,
        result: Value,
    },
    StepFailed {
        failure: StepFailure,
    },
    StepAborted {
        step: StepName,
        after: StepName,
    },
    ProjectFinished {
        project_id: Uuid,
        status: ProjectStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// What one call to `run` or `run_step` did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub project_id: Uuid,
    pub executed: Vec<StepName>,
    pub failure: Option<StepFailure>,
    pub aborted: Vec<StepName>,
    pub status: ProjectStatus,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs a project's steps in order, persisting every transition
pub struct PipelineEngine {
    store: Arc<dyn PipelineStore>,
    runner: Arc<dyn StepRunner>,
    event_handlers: Vec<EventHandler>,
    active: Mutex<HashSet<Uuid>>,
}

impl PipelineEngine {
    pub fn new(store: Arc<dyn PipelineStore>, runner: Arc<dyn StepRunner>) -> Self {
        Self {
            store,
            runner,
            event_handlers: Vec::new(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers. A panicking handler is logged and ignored.
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            let event = event.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("Event handler panicked; continuing");
            }
        }
    }

    /// Create a project with its full pending step set
    pub async fn create_project(&self, project: &Project) -> Result<()> {
        let steps = PipelineStep::full_set(project.id);
        self.store
            .create_project(project, &steps)
            .await
            .with_context(|| format!("Failed to create project {}", project.name))?;
        self.log(project.id, None, LogLevel::Info, "project created", None)
            .await;
        info!("Created project {} ({})", project.name, project.id);
        Ok(())
    }

    /// Run every pending step in order, starting at `from` when given.
    ///
    /// Stops at the first failed step or unmet gate. Store errors are
    /// returned as `Err`; step outcomes are in the summary.
    pub async fn run(&self, project_id: Uuid, from: Option<StepName>) -> Result<RunSummary> {
        let _guard = self.claim(project_id)?;
        let project = self.load_project(project_id).await?;

        info!("Starting pipeline for {} ({})", project.name, project_id);
        self.emit_event(ExecutionEvent::ProjectStarted {
            project_id,
            project_name: project.name.clone(),
            from,
        });

        let mut steps = self.store.get_steps(project_id).await?;
        let plan = plan_resume(&mut steps, from);
        for step in steps
            .iter()
            .filter(|s| plan.skipped.contains(&s.name) || plan.reset.contains(&s.name))
        {
            self.store.update_step(step).await?;
        }
        for name in &plan.skipped {
            let reason = format!("run started at {}", from.map(|s| s.as_str()).unwrap_or(""));
            self.log(project_id, Some(*name), LogLevel::Info, &format!("skipped: {}", reason), None)
                .await;
            self.emit_event(ExecutionEvent::StepSkipped {
                step: *name,
                reason,
            });
        }

        let queue = pending_in_order(&steps);
        let mut summary = RunSummary {
            project_id,
            executed: Vec::new(),
            failure: None,
            aborted: Vec::new(),
            status: project.status,
        };

        for (index, step) in queue.iter().enumerate() {
            summary.executed.push(*step);
            if let Err(failure) = self.execute_step(project_id, *step).await? {
                if let StepFailure::Execution { step: failed, .. } = &failure {
                    for later in &queue[index + 1..] {
                        info!("Step {} aborted after {} failed", later, failed);
                        self.emit_event(ExecutionEvent::StepAborted {
                            step: *later,
                            after: *failed,
                        });
                        summary.aborted.push(*later);
                    }
                }
                summary.failure = Some(failure);
                break;
            }
        }

        self.finish(&mut summary).await?;
        Ok(summary)
    }

    /// Run exactly one step with the same gating and persistence as `run`.
    ///
    /// A step that already ran is only reset once its gate passes, so a
    /// refused rerun leaves the earlier outcome in place.
    pub async fn run_step(&self, project_id: Uuid, step: StepName) -> Result<RunSummary> {
        let _guard = self.claim(project_id)?;
        let project = self.load_project(project_id).await?;

        let mut summary = RunSummary {
            project_id,
            executed: vec![step],
            failure: self.execute_step(project_id, step).await?.err(),
            aborted: Vec::new(),
            status: project.status,
        };
        self.finish(&mut summary).await?;
        Ok(summary)
    }

    /// Gate, mark running, run, persist. The outer `Result` is for store errors.
    async fn execute_step(
        &self,
        project_id: Uuid,
        step: StepName,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let ctx = self.context(project_id).await?;
        let snapshot = GateSnapshot {
            steps: &ctx.steps,
            latest_local_report: ctx.latest_local_report.as_ref(),
            publish_records: &ctx.publish_records,
        };
        if let Err(violation) = gate::evaluate(step, &snapshot) {
            let failure = StepFailure::GateNotSatisfied { step, violation };
            warn!("{}", failure);
            self.log(project_id, Some(step), LogLevel::Warn, &failure.to_string(), None)
                .await;
            self.emit_event(ExecutionEvent::StepFailed {
                failure: failure.clone(),
            });
            return Ok(Err(failure));
        }

        let mut record = ctx
            .steps
            .iter()
            .find(|s| s.name == step)
            .cloned()
            .with_context(|| format!("Project {} has no '{}' step", project_id, step))?;
        record.reset();
        record.start();
        self.store.update_step(&record).await?;
        info!("Running step {} for {}", step, project_id);
        self.log(project_id, Some(step), LogLevel::Info, "step started", None)
            .await;
        self.emit_event(ExecutionEvent::StepStarted { step });

        let outcome = self.runner.run(step, &ctx).await;
        match self.settle(&ctx, &mut record, outcome).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.abandon(&ctx.project, &mut record, &e).await;
                Err(e)
            }
        }
    }

    /// Persist what a step body returned
    async fn settle(
        &self,
        ctx: &StepContext,
        record: &mut PipelineStep,
        outcome: std::result::Result<StepOutcome, StepError>,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let project_id = ctx.project.id;
        let step = record.name;
        match outcome {
            Ok(outcome) => {
                for report in &outcome.reports {
                    self.store.add_test_report(report).await?;
                }
                if let Some(publish) = &outcome.publish {
                    self.store.add_publish_record(publish).await?;
                }
                record.succeed(outcome.data.clone());
                self.store.update_step(record).await?;

                if let Some(milestone) = step.milestone() {
                    let mut project = ctx.project.clone();
                    project.set_status(milestone);
                    self.store.update_project(&project).await?;
                }

                info!("Step {} succeeded", step);
                self.log(
                    project_id,
                    Some(step),
                    LogLevel::Info,
                    "step succeeded",
                    Some(outcome.data.clone()),
                )
                .await;
                self.emit_event(ExecutionEvent::StepSucceeded {
                    step,
                    result: outcome.data,
                });
                Ok(Ok(()))
            }
            Err(e) => {
                for report in &e.reports {
                    self.store.add_test_report(report).await?;
                }
                record.fail(e.message.clone());
                self.store.update_step(record).await?;

                let mut project = ctx.project.clone();
                project.set_status(ProjectStatus::Failed);
                self.store.update_project(&project).await?;

                let failure = StepFailure::Execution {
                    step,
                    message: e.message,
                };
                error!("{}", failure);
                self.log(project_id, Some(step), LogLevel::Error, &failure.to_string(), None)
                    .await;
                self.emit_event(ExecutionEvent::StepFailed {
                    failure: failure.clone(),
                });
                Ok(Err(failure))
            }
        }
    }

    /// Best effort: a step that was marked running must not stay running
    /// when its outcome could not be stored
    async fn abandon(&self, project: &Project, record: &mut PipelineStep, cause: &anyhow::Error) {
        error!("Storing outcome of step {} failed: {:#}", record.name, cause);
        record.fail(format!("failed to store step outcome: {:#}", cause));
        if let Err(e) = self.store.update_step(record).await {
            warn!("Could not mark step {} failed: {}", record.name, e);
        }
        let mut project = project.clone();
        project.set_status(ProjectStatus::Failed);
        if let Err(e) = self.store.update_project(&project).await {
            warn!("Could not mark project {} failed: {}", project.id, e);
        }
    }

    /// Settle the project status after a run and announce it
    async fn finish(&self, summary: &mut RunSummary) -> Result<()> {
        let mut project = self.load_project(summary.project_id).await?;
        let steps = self.store.get_steps(summary.project_id).await?;
        let complete = steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .all(|s| s.status == StepStatus::Success);

        if complete && project.status != ProjectStatus::Completed {
            project.set_status(ProjectStatus::Completed);
            self.store.update_project(&project).await?;
            self.log(project.id, None, LogLevel::Info, "project completed", None)
                .await;
        } else if !complete && project.status == ProjectStatus::Completed {
            let reached = last_milestone(&steps);
            warn!("Project {} is no longer complete, back to {}", project.id, reached);
            project.set_status(reached);
            self.store.update_project(&project).await?;
            self.log(
                project.id,
                None,
                LogLevel::Warn,
                &format!("project no longer complete, status back to {}", reached),
                None,
            )
            .await;
        }

        summary.status = project.status;
        info!(
            "Pipeline for {} finished: {}",
            project.name, project.status
        );
        self.emit_event(ExecutionEvent::ProjectFinished {
            project_id: project.id,
            status: project.status,
        });
        Ok(())
    }

    async fn context(&self, project_id: Uuid) -> Result<StepContext> {
        Ok(StepContext {
            project: self.load_project(project_id).await?,
            steps: self.store.get_steps(project_id).await?,
            publish_records: self.store.list_publish_records(project_id).await?,
            latest_local_report: self
                .store
                .latest_test_report(project_id, TestType::Local)
                .await?,
        })
    }

    async fn load_project(&self, project_id: Uuid) -> Result<Project> {
        self.store
            .get_project(project_id)
            .await?
            .with_context(|| format!("Project {} not found", project_id))
    }

    /// Operation log write; failures only warn
    async fn log(
        &self,
        project_id: Uuid,
        step: Option<StepName>,
        level: LogLevel,
        message: &str,
        details: Option<Value>,
    ) {
        let mut entry = OperationLog::new(project_id, step, level, message);
        if let Some(details) = details {
            entry = entry.with_details(details);
        }
        if let Err(e) = self.store.add_log(&entry).await {
            warn!("Failed to write operation log for {}: {}", project_id, e);
        }
    }

    /// One run per project at a time
    fn claim(&self, project_id: Uuid) -> Result<ActiveGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(project_id) {
            anyhow::bail!("Project {} is already running", project_id);
        }
        Ok(ActiveGuard {
            engine: self,
            project_id,
        })
    }
}

/// Milestone of the latest successful step, `created` when there is none
fn last_milestone(steps: &[PipelineStep]) -> ProjectStatus {
    let mut ordered: Vec<&PipelineStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.order);
    ordered
        .iter()
        .rev()
        .filter(|s| s.status == StepStatus::Success)
        .find_map(|s| s.name.milestone())
        .unwrap_or(ProjectStatus::Created)
}

struct ActiveGuard<'a> {
    engine: &'a PipelineEngine,
    project_id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.project_id);
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("event_handlers", &self.event_handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ReportStatus, TestReport};
    use serde_json::json;
    use crate::persistence::InMemoryStore;
    use std::sync::Mutex as StdMutex;

    /// Succeeds every step except the one named, recording what it ran
    struct ScriptedRunner {
        fail_on: Option<StepName>,
        local_failed: u32,
        ran: StdMutex<Vec<StepName>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                fail_on: None,
                local_failed: 0,
                ran: StdMutex::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<StepName> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run(&self, step: StepName, ctx: &StepContext) -> Result<StepOutcome, StepError> {
            self.ran.lock().unwrap().push(step);
            if Some(step) == self.fail_on {
                return Err(StepError::new("boom"));
            }
            let mut outcome = StepOutcome::new(json!({"step": step.as_str()}));
            if step == StepName::LocalTest {
                let status = if self.local_failed == 0 {
                    ReportStatus::Success
                } else {
                    ReportStatus::Failed
                };
                outcome = outcome.with_report(
                    TestReport::new(ctx.project.id, TestType::Local, status)
                        .with_counts(3, self.local_failed, 0),
                );
            }
            if step.publishes() {
                outcome = outcome.with_publish(crate::core::PublishRecord::new(ctx.project.id, step));
            }
            Ok(outcome)
        }
    }

    async fn engine_with(runner: Arc<ScriptedRunner>) -> (PipelineEngine, Arc<InMemoryStore>, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let engine = PipelineEngine::new(store.clone(), runner);
        let project = Project::new("weather", "https://example.com/weather");
        engine.create_project(&project).await.unwrap();
        (engine, store, project.id)
    }

    #[tokio::test]
    async fn test_full_run_completes() {
        let runner = Arc::new(ScriptedRunner::new());
        let (engine, store, id) = engine_with(runner.clone()).await;

        let summary = engine.run(id, None).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.status, ProjectStatus::Completed);
        assert_eq!(runner.ran(), StepName::ALL.to_vec());
        assert_eq!(store.list_publish_records(id).await.unwrap().len(), 5);
        let steps = store.get_steps(id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Success));
    }

    #[tokio::test]
    async fn test_failure_stops_and_aborts_rest() {
        let mut runner = ScriptedRunner::new();
        runner.fail_on = Some(StepName::Github);
        let runner = Arc::new(runner);
        let (engine, store, id) = engine_with(runner.clone()).await;

        let summary = engine.run(id, None).await.unwrap();

        assert_eq!(runner.ran(), vec![StepName::Crawl, StepName::Convert, StepName::Github]);
        assert_eq!(summary.status, ProjectStatus::Failed);
        assert_eq!(summary.aborted.len(), 6);
        assert!(matches!(
            summary.failure,
            Some(StepFailure::Execution { step: StepName::Github, .. })
        ));

        let steps = store.get_steps(id).await.unwrap();
        assert_eq!(steps[2].status, StepStatus::Failed);
        assert_eq!(steps[2].error.as_deref(), Some("boom"));
        assert_eq!(steps[3].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_failing_local_report_blocks_marketplace() {
        let mut runner = ScriptedRunner::new();
        runner.local_failed = 2;
        let runner = Arc::new(runner);
        let (engine, store, id) = engine_with(runner.clone()).await;

        let summary = engine.run(id, None).await.unwrap();

        assert!(!runner.ran().contains(&StepName::Emcp));
        match summary.failure {
            Some(StepFailure::GateNotSatisfied { step, .. }) => assert_eq!(step, StepName::Emcp),
            other => panic!("expected gate failure, got {:?}", other),
        }
        let steps = store.get_steps(id).await.unwrap();
        assert_eq!(steps[5].status, StepStatus::Pending);
        assert_eq!(summary.status, ProjectStatus::Pypi);
    }

    #[tokio::test]
    async fn test_events_and_panicking_handler() {
        let runner = Arc::new(ScriptedRunner::new());
        let store = Arc::new(InMemoryStore::new());
        let mut engine = PipelineEngine::new(store.clone(), runner);
        let seen = Arc::new(StdMutex::new(0usize));
        let counter = seen.clone();
        engine.add_event_handler(|_| panic!("observer bug"));
        engine.add_event_handler(move |_| *counter.lock().unwrap() += 1);

        let project = Project::new("weather", "src");
        engine.create_project(&project).await.unwrap();
        let summary = engine.run(project.id, None).await.unwrap();

        assert!(summary.succeeded());
        // started + 9 x (started, succeeded) + finished
        assert_eq!(*seen.lock().unwrap(), 20);
    }

    #[tokio::test]
    async fn test_run_step_respects_gate() {
        let runner = Arc::new(ScriptedRunner::new());
        let (engine, _store, id) = engine_with(runner.clone()).await;

        let summary = engine.run_step(id, StepName::Convert).await.unwrap();
        assert!(matches!(
            summary.failure,
            Some(StepFailure::GateNotSatisfied { .. })
        ));
        assert!(runner.ran().is_empty());

        engine.run_step(id, StepName::Crawl).await.unwrap();
        let summary = engine.run_step(id, StepName::Convert).await.unwrap();
        assert!(summary.succeeded());
        assert_eq!(summary.status, ProjectStatus::Converted);
    }

    #[tokio::test]
    async fn test_operation_log_records_transitions() {
        let runner = Arc::new(ScriptedRunner::new());
        let (engine, store, id) = engine_with(runner).await;
        engine.run_step(id, StepName::Crawl).await.unwrap();

        let logs = store.list_logs(id, 10).await.unwrap();
        assert_eq!(logs[0].message, "step succeeded");
        assert_eq!(logs[1].message, "step started");
        assert_eq!(logs.last().map(|l| l.message.as_str()), Some("project created"));
    }

    /// In-memory store whose publish writes fail
    struct PublishOutage {
        inner: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl PipelineStore for PublishOutage {
        async fn create_project(&self, project: &Project, steps: &[PipelineStep]) -> Result<()> {
            self.inner.create_project(project, steps).await
        }
        async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
            self.inner.get_project(id).await
        }
        async fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>> {
            self.inner.list_projects(status).await
        }
        async fn update_project(&self, project: &Project) -> Result<()> {
            self.inner.update_project(project).await
        }
        async fn get_steps(&self, project_id: Uuid) -> Result<Vec<PipelineStep>> {
            self.inner.get_steps(project_id).await
        }
        async fn update_step(&self, step: &PipelineStep) -> Result<()> {
            self.inner.update_step(step).await
        }
        async fn add_test_report(&self, report: &TestReport) -> Result<()> {
            self.inner.add_test_report(report).await
        }
        async fn list_test_reports(&self, project_id: Uuid) -> Result<Vec<TestReport>> {
            self.inner.list_test_reports(project_id).await
        }
        async fn latest_test_report(
            &self,
            project_id: Uuid,
            test_type: TestType,
        ) -> Result<Option<TestReport>> {
            self.inner.latest_test_report(project_id, test_type).await
        }
        async fn add_publish_record(&self, _record: &crate::core::PublishRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }
        async fn list_publish_records(&self, project_id: Uuid) -> Result<Vec<crate::core::PublishRecord>> {
            self.inner.list_publish_records(project_id).await
        }
        async fn list_publish_records_by_target(
            &self,
            target: &str,
        ) -> Result<Vec<crate::core::PublishRecord>> {
            self.inner.list_publish_records_by_target(target).await
        }
        async fn add_log(&self, entry: &OperationLog) -> Result<()> {
            self.inner.add_log(entry).await
        }
        async fn list_logs(&self, project_id: Uuid, limit: usize) -> Result<Vec<OperationLog>> {
            self.inner.list_logs(project_id, limit).await
        }
        async fn stats(&self) -> Result<crate::persistence::FactoryStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_store_error_does_not_leave_step_running() {
        let store = Arc::new(PublishOutage {
            inner: InMemoryStore::new(),
        });
        let engine = PipelineEngine::new(store.clone(), Arc::new(ScriptedRunner::new()));
        let project = Project::new("weather", "src");
        engine.create_project(&project).await.unwrap();

        let err = engine.run(project.id, None).await.unwrap_err();

        assert!(format!("{:#}", err).contains("disk full"));
        let steps = store.get_steps(project.id).await.unwrap();
        assert_eq!(steps[2].status, StepStatus::Failed);
        assert!(steps[2].error.as_deref().unwrap_or_default().contains("disk full"));
        assert!(steps[2].ended_at.is_some());
        let project = store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Failed);

        // the claim was released, so a rerun gets as far as the store again
        let again = engine.run(project.id, None).await.unwrap_err();
        assert!(!format!("{:#}", again).contains("already running"));
        assert!(engine.active.lock().unwrap().is_empty());
    }
}
