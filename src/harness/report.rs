//! Harness phases and the report a harness run produces

use crate::core::{ReportStatus, TestReport, TestType};
use crate::harness::classify::CapabilityStatus;
use crate::harness::HarnessError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// Harness lifecycle, in order. There are no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessPhase {
    Provisioning,
    EnteringTestState,
    ResolvingInstance,
    ResolvingConnection,
    AwaitingReady,
    EnumeratingCapabilities,
    InvokingCapabilities,
    RestoringPublishState,
    Done,
}

impl fmt::Display for HarnessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HarnessPhase::Provisioning => "provisioning",
            HarnessPhase::EnteringTestState => "entering-test-state",
            HarnessPhase::ResolvingInstance => "resolving-instance",
            HarnessPhase::ResolvingConnection => "resolving-connection",
            HarnessPhase::AwaitingReady => "awaiting-ready",
            HarnessPhase::EnumeratingCapabilities => "enumerating-capabilities",
            HarnessPhase::InvokingCapabilities => "invoking-capabilities",
            HarnessPhase::RestoringPublishState => "restoring-publish-state",
            HarnessPhase::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: HarnessPhase,
    pub ok: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Outcome of invoking one capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub name: String,
    pub status: CapabilityStatus,
    pub arguments: Value,
    /// Leading part of the result or error text
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub template_id: String,
    pub phases: Vec<PhaseRecord>,
    /// First fatal phase, if any
    pub failed_phase: Option<HarnessPhase>,
    pub error: Option<String>,
    /// Likely causes, when the instance never became reachable
    pub diagnostics: Vec<String>,
    pub capabilities: Vec<CapabilityResult>,
    pub restored: bool,
    pub pass_threshold: f64,
    pub duration_ms: u64,
}

impl HarnessReport {
    pub fn new(template_id: impl Into<String>, pass_threshold: f64) -> Self {
        Self {
            template_id: template_id.into(),
            phases: Vec::new(),
            failed_phase: None,
            error: None,
            diagnostics: Vec::new(),
            capabilities: Vec::new(),
            restored: false,
            pass_threshold,
            duration_ms: 0,
        }
    }

    pub fn record_phase(&mut self, phase: HarnessPhase, ok: bool, detail: impl Into<String>, elapsed_ms: u64) {
        self.phases.push(PhaseRecord {
            phase,
            ok,
            detail: detail.into(),
            elapsed_ms,
        });
    }

    pub fn record_fatal(&mut self, error: &HarnessError, elapsed_ms: u64) {
        self.record_phase(error.phase, false, error.message.clone(), elapsed_ms);
        if self.failed_phase.is_none() {
            self.failed_phase = Some(error.phase);
            self.error = Some(error.to_string());
        }
    }

    pub fn total(&self) -> usize {
        self.capabilities.len()
    }

    pub fn count(&self, status: CapabilityStatus) -> usize {
        self.capabilities.iter().filter(|c| c.status == status).count()
    }

    /// Passed plus half of partial
    pub fn passed_weight(&self) -> f64 {
        self.capabilities.iter().map(|c| c.status.pass_weight()).sum()
    }

    /// Everything that is not pass weight; partial contributes its other half
    pub fn failed_weight(&self) -> f64 {
        self.capabilities
            .iter()
            .map(|c| 1.0 - c.status.pass_weight())
            .sum()
    }

    pub fn success_rate(&self) -> f64 {
        if self.capabilities.is_empty() {
            0.0
        } else {
            self.passed_weight() / self.total() as f64
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_phase.is_none() && self.success_rate() >= self.pass_threshold
    }

    pub fn summary(&self) -> String {
        match self.failed_phase {
            Some(phase) => format!("aborted at {}", phase),
            None => format!(
                "{}/{} passed, {} partial, rate {:.0}%",
                self.count(CapabilityStatus::Passed),
                self.total(),
                self.count(CapabilityStatus::Partial),
                self.success_rate() * 100.0
            ),
        }
    }

    /// Persistable form. Integer counts cannot hold the half weight of a
    /// partial result, so partials are kept in `raw` and excluded from both.
    pub fn to_test_report(
        &self,
        project_id: Uuid,
        test_type: TestType,
        platform: &str,
    ) -> TestReport {
        let status = if self.is_success() {
            ReportStatus::Success
        } else {
            ReportStatus::Failed
        };
        let passed = self.count(CapabilityStatus::Passed) as u32;
        let partial = self.count(CapabilityStatus::Partial) as u32;
        let failed = self.total() as u32 - passed - partial;

        let raw = json!({
            "template_id": self.template_id,
            "success_rate": self.success_rate(),
            "passed_weight": self.passed_weight(),
            "failed_weight": self.failed_weight(),
            "partial": partial,
            "failed_phase": self.failed_phase,
            "diagnostics": self.diagnostics,
            "phases": self.phases,
            "capabilities": self.capabilities,
            "restored": self.restored,
        });

        let mut report = TestReport::new(project_id, test_type, status)
            .on_platform(platform)
            .with_counts(passed, failed, 0)
            .with_partial(partial)
            .with_duration_ms(self.duration_ms)
            .with_raw(raw);
        if let Some(error) = &self.error {
            report = report.with_error(error.clone());
        } else if !self.is_success() {
            report = report.with_error(self.summary());
        }
        report
    }
}
