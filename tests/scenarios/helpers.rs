//! Shared fakes for pipeline scenario tests

use mcp_factory::core::{
    PipelineStep, Project, PublishRecord, ReportStatus, StepContext, StepName, StepStatus,
    TestReport, TestType,
};
use mcp_factory::execution::{
    ExecutionEvent, PipelineEngine, StepError, StepOutcome, StepRunner,
};
use mcp_factory::persistence::{InMemoryStore, PipelineStore};
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Step runner with scriptable failures that records every step it ran
pub struct ScriptedRunner {
    fail_on: Mutex<Option<StepName>>,
    local_failed: Mutex<u32>,
    ran: Mutex<Vec<StepName>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_on: Mutex::new(None),
            local_failed: Mutex::new(0),
            ran: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_on(&self, step: Option<StepName>) {
        *self.fail_on.lock().unwrap() = step;
    }

    pub fn local_failures(&self, failed: u32) {
        *self.local_failed.lock().unwrap() = failed;
    }

    pub fn ran(&self) -> Vec<StepName> {
        self.ran.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.ran.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&self, step: StepName, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        self.ran.lock().unwrap().push(step);
        if *self.fail_on.lock().unwrap() == Some(step) {
            return Err(StepError::new(format!("{} collaborator exited with code 1", step)));
        }

        let mut outcome = StepOutcome::new(json!({ "step": step.as_str() }));
        if step == StepName::LocalTest {
            let failed = *self.local_failed.lock().unwrap();
            outcome = outcome.with_report(local_report(ctx.project.id, failed));
        }
        if step.publishes() {
            let mut record = PublishRecord::new(ctx.project.id, step);
            record.url = Some(format!("https://example.com/{}/{}", step, ctx.project.name));
            outcome = outcome.with_publish(record);
        }
        Ok(outcome)
    }
}

pub fn local_report(project_id: Uuid, failed: u32) -> TestReport {
    let status = if failed == 0 {
        ReportStatus::Success
    } else {
        ReportStatus::Failed
    };
    TestReport::new(project_id, TestType::Local, status).with_counts(10, failed, 0)
}

pub struct Harness {
    pub engine: PipelineEngine,
    pub store: Arc<InMemoryStore>,
    pub runner: Arc<ScriptedRunner>,
    pub events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

/// Engine over an in-memory store with an event recorder attached
pub fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let runner = ScriptedRunner::new();
    let mut engine = PipelineEngine::new(store.clone(), runner.clone());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
    Harness {
        engine,
        store,
        runner,
        events,
    }
}

pub async fn new_project(h: &Harness) -> Uuid {
    let project = Project::new("weather", "https://github.com/acme/weather-mcp")
        .with_metadata("package_name", "weather-mcp");
    h.engine.create_project(&project).await.unwrap();
    project.id
}

/// Overwrite recorded step statuses directly, as an earlier run would have
pub async fn set_statuses(store: &InMemoryStore, project_id: Uuid, statuses: &[(StepName, StepStatus)]) {
    let steps = store.get_steps(project_id).await.unwrap();
    for (name, status) in statuses {
        let mut step: PipelineStep = steps.iter().find(|s| s.name == *name).unwrap().clone();
        match status {
            StepStatus::Success => step.succeed(json!({})),
            StepStatus::Skipped => step.skip("done elsewhere"),
            StepStatus::Failed => step.fail("earlier failure"),
            StepStatus::Running => step.start(),
            StepStatus::Pending => step.reset(),
        }
        store.update_step(&step).await.unwrap();
    }
}

pub async fn statuses(store: &InMemoryStore, project_id: Uuid) -> Vec<StepStatus> {
    store
        .get_steps(project_id)
        .await
        .unwrap()
        .iter()
        .map(|s| s.status)
        .collect()
}
