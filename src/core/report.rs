//! Test reports, publish records and operation log entries

use crate::core::step::StepName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// Package tested on the operator's machine
    Local,
    /// Template tested on the marketplace control plane before listing
    Platform,
    /// Published listing verified after release
    Online,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Local => "local",
            TestType::Platform => "platform",
            TestType::Online => "online",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "local" => TestType::Local,
            "platform" => TestType::Platform,
            "online" => TestType::Online,
            other => anyhow::bail!("unknown test type '{}'", other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::Failed => "failed",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "success" => ReportStatus::Success,
            "failed" => ReportStatus::Failed,
            other => anyhow::bail!("unknown report status '{}'", other),
        })
    }
}

/// Outcome of one test phase. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub id: Uuid,
    pub project_id: Uuid,
    pub test_type: TestType,
    pub platform: Option<String>,
    pub status: ReportStatus,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Checks that half succeeded; each weighs 0.5 on either side
    #[serde(default)]
    pub partial: u32,
    pub duration_ms: u64,
    pub raw: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestReport {
    pub fn new(project_id: Uuid, test_type: TestType, status: ReportStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            test_type,
            platform: None,
            status,
            passed: 0,
            failed: 0,
            skipped: 0,
            partial: 0,
            duration_ms: 0,
            raw: Value::Null,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn on_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_counts(mut self, passed: u32, failed: u32, skipped: u32) -> Self {
        self.passed = passed;
        self.failed = failed;
        self.skipped = skipped;
        self
    }

    pub fn with_partial(mut self, partial: u32) -> Self {
        self.partial = partial;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// The condition marketplace listings are gated on
    pub fn passed_cleanly(&self) -> bool {
        self.status == ReportStatus::Success && self.failed == 0
    }
}

/// Evidence that a target was published to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Target name, one of the publishing step names
    pub target: String,
    pub url: Option<String>,
    pub package_id: Option<String>,
    pub version: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl PublishRecord {
    pub fn new(project_id: Uuid, target: StepName) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            target: target.as_str().to_string(),
            url: None,
            package_id: None,
            version: None,
            status: "published".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Fill url, package id and version from a structured step result
    pub fn from_result(project_id: Uuid, target: StepName, result: &Value) -> Self {
        let field = |key: &str| {
            result.get(key).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        let mut record = Self::new(project_id, target);
        record.url = field("url");
        record.package_id = field("package_id");
        record.version = field("version");
        if let Some(status) = field("status") {
            record.status = status;
        }
        record
    }

    pub fn target_step(&self) -> Option<StepName> {
        self.target.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => anyhow::bail!("unknown log level '{}'", other),
        })
    }
}

/// Persisted operation log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: Uuid,
    pub project_id: Uuid,
    pub step: Option<StepName>,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl OperationLog {
    pub fn new(
        project_id: Uuid,
        step: Option<StepName>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            step,
            level,
            message: message.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
