//! SQLite-based persistence store

use crate::core::{
    LogLevel, OperationLog, PipelineStep, Project, ProjectStatus, PublishRecord, ReportStatus,
    StepName, StepStatus, TestReport, TestType,
};
use crate::persistence::{FactoryStats, PipelineStore, ReportTally};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        source TEXT NOT NULL,
        artifact_path TEXT,
        status TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_steps (
        project_id TEXT NOT NULL REFERENCES projects(id),
        step_name TEXT NOT NULL,
        step_order INTEGER NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT,
        ended_at TEXT,
        result TEXT,
        error TEXT,
        PRIMARY KEY (project_id, step_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS test_reports (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        test_type TEXT NOT NULL,
        platform TEXT,
        status TEXT NOT NULL,
        passed INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        skipped INTEGER NOT NULL DEFAULT 0,
        partial INTEGER NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        raw TEXT NOT NULL DEFAULT 'null',
        error TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS publish_records (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id),
        target TEXT NOT NULL,
        url TEXT,
        package_id TEXT,
        version TEXT,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operation_logs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        step_name TEXT,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        details TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status)",
    "CREATE INDEX IF NOT EXISTS idx_reports_project ON test_reports(project_id, test_type)",
    "CREATE INDEX IF NOT EXISTS idx_publish_project ON publish_records(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_publish_target ON publish_records(target)",
    "CREATE INDEX IF NOT EXISTS idx_logs_project ON operation_logs(project_id)",
];

/// SQLite pipeline store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store. `:memory:` gives a private in-memory database.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            // Every pooled connection would otherwise see its own empty database
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        } else {
            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true);
            SqlitePoolOptions::new().connect_with(options).await
        }
        .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Open a store at a file path, creating parent directories
    pub async fn at_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let path = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("database path is not valid UTF-8"))?;
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize schema")?;
        }
        Ok(())
    }

    fn json_text(value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn parse_json(text: Option<String>) -> Result<Option<Value>> {
        text.map(|t| serde_json::from_str(&t).context("corrupt JSON column"))
            .transpose()
    }

    fn project_from_row(row: &SqliteRow) -> Result<Project> {
        Ok(Project {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            name: row.get("name"),
            source: row.get("source"),
            artifact_path: row.get("artifact_path"),
            status: row.get::<String, _>("status").parse()?,
            metadata: serde_json::from_str(&row.get::<String, _>("metadata"))?,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }

    fn step_from_row(row: &SqliteRow) -> Result<PipelineStep> {
        Ok(PipelineStep {
            project_id: Uuid::parse_str(&row.get::<String, _>("project_id"))?,
            name: row.get::<String, _>("step_name").parse()?,
            order: row.get::<i64, _>("step_order") as u32,
            status: row.get::<String, _>("status").parse::<StepStatus>()?,
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            result: Self::parse_json(row.get("result"))?,
            error: row.get("error"),
        })
    }

    fn report_from_row(row: &SqliteRow) -> Result<TestReport> {
        Ok(TestReport {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            project_id: Uuid::parse_str(&row.get::<String, _>("project_id"))?,
            test_type: row.get::<String, _>("test_type").parse()?,
            platform: row.get("platform"),
            status: row.get::<String, _>("status").parse()?,
            passed: row.get::<i64, _>("passed") as u32,
            failed: row.get::<i64, _>("failed") as u32,
            skipped: row.get::<i64, _>("skipped") as u32,
            partial: row.get::<i64, _>("partial") as u32,
            duration_ms: row.get::<i64, _>("duration_ms") as u64,
            raw: Self::parse_json(row.get("raw"))?.unwrap_or(Value::Null),
            error: row.get("error"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }

    fn publish_from_row(row: &SqliteRow) -> Result<PublishRecord> {
        Ok(PublishRecord {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            project_id: Uuid::parse_str(&row.get::<String, _>("project_id"))?,
            target: row.get("target"),
            url: row.get("url"),
            package_id: row.get("package_id"),
            version: row.get("version"),
            status: row.get("status"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }

    fn log_from_row(row: &SqliteRow) -> Result<OperationLog> {
        Ok(OperationLog {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            project_id: Uuid::parse_str(&row.get::<String, _>("project_id"))?,
            step: row
                .get::<Option<String>, _>("step_name")
                .map(|s| s.parse::<StepName>())
                .transpose()?,
            level: row.get::<String, _>("level").parse::<LogLevel>()?,
            message: row.get("message"),
            details: Self::parse_json(row.get("details"))?,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }
}

#[async_trait::async_trait]
impl PipelineStore for SqliteStore {
    async fn create_project(&self, project: &Project, steps: &[PipelineStep]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects
            (id, name, source, artifact_path, status, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.source)
        .bind(&project.artifact_path)
        .bind(project.status.as_str())
        .bind(serde_json::to_string(&project.metadata)?)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert project")?;

        for step in steps {
            sqlx::query(
                r#"
                INSERT INTO pipeline_steps (project_id, step_name, step_order, status)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(step.project_id.to_string())
            .bind(step.name.as_str())
            .bind(step.order as i64)
            .bind(step.status.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to insert pipeline step")?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load project")?;

        row.as_ref().map(Self::project_from_row).transpose()
    }

    async fn list_projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM projects WHERE status = ?1 ORDER BY created_at DESC, rowid DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM projects ORDER BY created_at DESC, rowid DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list projects")?;

        rows.iter().map(Self::project_from_row).collect()
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET name = ?2, source = ?3, artifact_path = ?4, status = ?5, metadata = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(project.id.to_string())
        .bind(&project.name)
        .bind(&project.source)
        .bind(&project.artifact_path)
        .bind(project.status.as_str())
        .bind(serde_json::to_string(&project.metadata)?)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update project")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("project {} not found", project.id);
        }
        Ok(())
    }

    async fn get_steps(&self, project_id: Uuid) -> Result<Vec<PipelineStep>> {
        let rows = sqlx::query(
            "SELECT * FROM pipeline_steps WHERE project_id = ?1 ORDER BY step_order ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load steps")?;

        rows.iter().map(Self::step_from_row).collect()
    }

    async fn update_step(&self, step: &PipelineStep) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_steps
            SET status = ?3, started_at = ?4, ended_at = ?5, result = ?6, error = ?7
            WHERE project_id = ?1 AND step_name = ?2
            "#,
        )
        .bind(step.project_id.to_string())
        .bind(step.name.as_str())
        .bind(step.status.as_str())
        .bind(step.started_at)
        .bind(step.ended_at)
        .bind(step.result.as_ref().map(Self::json_text).transpose()?)
        .bind(&step.error)
        .execute(&self.pool)
        .await
        .context("Failed to update step")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("step {} not found for project {}", step.name, step.project_id);
        }
        Ok(())
    }

    async fn add_test_report(&self, report: &TestReport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO test_reports
            (id, project_id, test_type, platform, status, passed, failed, skipped, partial, duration_ms, raw, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(report.id.to_string())
        .bind(report.project_id.to_string())
        .bind(report.test_type.as_str())
        .bind(&report.platform)
        .bind(report.status.as_str())
        .bind(report.passed as i64)
        .bind(report.failed as i64)
        .bind(report.skipped as i64)
        .bind(report.partial as i64)
        .bind(report.duration_ms as i64)
        .bind(Self::json_text(&report.raw)?)
        .bind(&report.error)
        .bind(report.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save test report")?;

        Ok(())
    }

    async fn list_test_reports(&self, project_id: Uuid) -> Result<Vec<TestReport>> {
        let rows = sqlx::query(
            "SELECT * FROM test_reports WHERE project_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list test reports")?;

        rows.iter().map(Self::report_from_row).collect()
    }

    async fn latest_test_report(
        &self,
        project_id: Uuid,
        test_type: TestType,
    ) -> Result<Option<TestReport>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM test_reports
            WHERE project_id = ?1 AND test_type = ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(project_id.to_string())
        .bind(test_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load latest test report")?;

        row.as_ref().map(Self::report_from_row).transpose()
    }

    async fn add_publish_record(&self, record: &PublishRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_records
            (id, project_id, target, url, package_id, version, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.project_id.to_string())
        .bind(&record.target)
        .bind(&record.url)
        .bind(&record.package_id)
        .bind(&record.version)
        .bind(&record.status)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save publish record")?;

        Ok(())
    }

    async fn list_publish_records(&self, project_id: Uuid) -> Result<Vec<PublishRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_records WHERE project_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list publish records")?;

        rows.iter().map(Self::publish_from_row).collect()
    }

    async fn list_publish_records_by_target(&self, target: &str) -> Result<Vec<PublishRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_records WHERE target = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list publish records")?;

        rows.iter().map(Self::publish_from_row).collect()
    }

    async fn add_log(&self, entry: &OperationLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operation_logs (id, project_id, step_name, level, message, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.project_id.to_string())
        .bind(entry.step.map(|s| s.as_str()))
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(entry.details.as_ref().map(Self::json_text).transpose()?)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to save operation log")?;

        Ok(())
    }

    async fn list_logs(&self, project_id: Uuid, limit: usize) -> Result<Vec<OperationLog>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM operation_logs
            WHERE project_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(project_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list operation logs")?;

        rows.iter().map(Self::log_from_row).collect()
    }

    async fn stats(&self) -> Result<FactoryStats> {
        let mut stats = FactoryStats::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM projects GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let n = row.get::<i64, _>("n") as usize;
            stats.total_projects += n;
            stats.projects_by_status.insert(row.get("status"), n);
        }

        let rows = sqlx::query(
            "SELECT test_type, status, COUNT(*) AS n FROM test_reports GROUP BY test_type, status",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let n = row.get::<i64, _>("n") as usize;
            let tally: &mut ReportTally = stats
                .reports_by_type
                .entry(row.get("test_type"))
                .or_default();
            match row.get::<String, _>("status").parse::<ReportStatus>()? {
                ReportStatus::Success => tally.passed += n,
                ReportStatus::Failed => tally.failed += n,
            }
        }

        let rows = sqlx::query("SELECT target, COUNT(*) AS n FROM publish_records GROUP BY target")
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            stats
                .publishes_by_target
                .insert(row.get("target"), row.get::<i64, _>("n") as usize);
        }

        Ok(stats)
    }
}
