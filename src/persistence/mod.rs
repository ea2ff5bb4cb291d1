//! Persistence layer for projects, steps, reports, publish records and logs

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use crate::core::{
    OperationLog, PipelineStep, Project, ProjectStatus, PublishRecord, ReportStatus, TestReport,
    TestType,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Pass/fail tally for one test type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTally {
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate counts across all projects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryStats {
    pub total_projects: usize,
    pub projects_by_status: BTreeMap<String, usize>,
    pub reports_by_type: BTreeMap<String, ReportTally>,
    pub publishes_by_target: BTreeMap<String, usize>,
}

/// Trait for persistence backends
///
/// Listing order is part of the contract: steps ascend by order index,
/// reports and logs are newest first, publish records oldest first.
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    /// Create a project together with its full step set
    async fn create_project(&self, project: &Project, steps: &[PipelineStep]) -> Result<()>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>>;

    /// List projects, optionally filtered by status, newest first
    async fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>>;

    async fn update_project(&self, project: &Project) -> Result<()>;

    async fn get_steps(&self, project_id: Uuid) -> Result<Vec<PipelineStep>>;

    async fn update_step(&self, step: &PipelineStep) -> Result<()>;

    async fn add_test_report(&self, report: &TestReport) -> Result<()>;

    async fn list_test_reports(&self, project_id: Uuid) -> Result<Vec<TestReport>>;

    async fn latest_test_report(
        &self,
        project_id: Uuid,
        test_type: TestType,
    ) -> Result<Option<TestReport>>;

    async fn add_publish_record(&self, record: &PublishRecord) -> Result<()>;

    async fn list_publish_records(&self, project_id: Uuid) -> Result<Vec<PublishRecord>>;

    async fn list_publish_records_by_target(&self, target: &str) -> Result<Vec<PublishRecord>>;

    async fn add_log(&self, entry: &OperationLog) -> Result<()>;

    async fn list_logs(&self, project_id: Uuid, limit: usize) -> Result<Vec<OperationLog>>;

    async fn stats(&self) -> Result<FactoryStats>;

    /// Whether the most recent report of this type passed cleanly
    async fn has_passed_test(&self, project_id: Uuid, test_type: TestType) -> Result<bool> {
        Ok(self
            .latest_test_report(project_id, test_type)
            .await?
            .map(|r| r.passed_cleanly())
            .unwrap_or(false))
    }
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryStore {
    projects: tokio::sync::RwLock<HashMap<Uuid, Project>>,
    steps: tokio::sync::RwLock<HashMap<Uuid, Vec<PipelineStep>>>,
    reports: tokio::sync::RwLock<Vec<TestReport>>,
    publishes: tokio::sync::RwLock<Vec<PublishRecord>>,
    logs: tokio::sync::RwLock<Vec<OperationLog>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            projects: tokio::sync::RwLock::new(HashMap::new()),
            steps: tokio::sync::RwLock::new(HashMap::new()),
            reports: tokio::sync::RwLock::new(Vec::new()),
            publishes: tokio::sync::RwLock::new(Vec::new()),
            logs: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PipelineStore for InMemoryStore {
    async fn create_project(&self, project: &Project, steps: &[PipelineStep]) -> Result<()> {
        let mut projects = self.projects.write().await;
        if projects.contains_key(&project.id) {
            anyhow::bail!("project {} already exists", project.id);
        }
        projects.insert(project.id, project.clone());

        let mut ordered = steps.to_vec();
        ordered.sort_by_key(|s| s.order);
        self.steps.write().await.insert(project.id, ordered);
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.projects.read().await.get(&id).cloned())
    }

    async fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>> {
        let projects = self.projects.read().await;
        let mut result: Vec<Project> = projects
            .values()
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        let mut projects = self.projects.write().await;
        match projects.get_mut(&project.id) {
            Some(existing) => {
                *existing = project.clone();
                Ok(())
            }
            None => anyhow::bail!("project {} not found", project.id),
        }
    }

    async fn get_steps(&self, project_id: Uuid) -> Result<Vec<PipelineStep>> {
        Ok(self
            .steps
            .read()
            .await
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_step(&self, step: &PipelineStep) -> Result<()> {
        let mut steps = self.steps.write().await;
        let existing = steps
            .get_mut(&step.project_id)
            .and_then(|list| list.iter_mut().find(|s| s.name == step.name));
        match existing {
            Some(existing) => {
                *existing = step.clone();
                Ok(())
            }
            None => anyhow::bail!("step {} not found for project {}", step.name, step.project_id),
        }
    }

    async fn add_test_report(&self, report: &TestReport) -> Result<()> {
        self.reports.write().await.push(report.clone());
        Ok(())
    }

    async fn list_test_reports(&self, project_id: Uuid) -> Result<Vec<TestReport>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .rev()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn latest_test_report(
        &self,
        project_id: Uuid,
        test_type: TestType,
    ) -> Result<Option<TestReport>> {
        let reports = self.reports.read().await;
        Ok(reports
            .iter()
            .rev()
            .find(|r| r.project_id == project_id && r.test_type == test_type)
            .cloned())
    }

    async fn add_publish_record(&self, record: &PublishRecord) -> Result<()> {
        self.publishes.write().await.push(record.clone());
        Ok(())
    }

    async fn list_publish_records(&self, project_id: Uuid) -> Result<Vec<PublishRecord>> {
        let publishes = self.publishes.read().await;
        Ok(publishes
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_publish_records_by_target(&self, target: &str) -> Result<Vec<PublishRecord>> {
        let publishes = self.publishes.read().await;
        Ok(publishes
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect())
    }

    async fn add_log(&self, entry: &OperationLog) -> Result<()> {
        self.logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_logs(&self, project_id: Uuid, limit: usize) -> Result<Vec<OperationLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|l| l.project_id == project_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<FactoryStats> {
        let projects = self.projects.read().await;
        let reports = self.reports.read().await;
        let publishes = self.publishes.read().await;

        let mut stats = FactoryStats {
            total_projects: projects.len(),
            ..FactoryStats::default()
        };
        for project in projects.values() {
            *stats
                .projects_by_status
                .entry(project.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        for report in reports.iter() {
            let tally = stats
                .reports_by_type
                .entry(report.test_type.as_str().to_string())
                .or_default();
            match report.status {
                ReportStatus::Success => tally.passed += 1,
                ReportStatus::Failed => tally.failed += 1,
            }
        }
        for record in publishes.iter() {
            *stats
                .publishes_by_target
                .entry(record.target.clone())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
