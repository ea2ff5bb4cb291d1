//! The factory's step bodies

use crate::control::{template_payload, ControlPlane};
use crate::core::{
    PublishRecord, ReportStatus, StepContext, StepName, TestReport, TestType,
};
use crate::execution::collaborators::PublishCollaborators;
use crate::execution::executor::{StepError, StepOutcome, StepRunner};
use crate::harness::{CapabilityTestHarness, HarnessReport};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const EMCP_PLATFORM: &str = "emcp";

/// Runs the capability harness against a template
#[async_trait::async_trait]
pub trait TemplateTester: Send + Sync {
    async fn test_template(&self, template_id: &str) -> HarnessReport;
}

#[async_trait::async_trait]
impl TemplateTester for CapabilityTestHarness {
    async fn test_template(&self, template_id: &str) -> HarnessReport {
        self.run(template_id).await
    }
}

/// Step runner wiring collaborators, the control plane and the harness together
pub struct FactorySteps {
    collaborators: Arc<dyn PublishCollaborators>,
    control: Arc<ControlPlane>,
    tester: Arc<dyn TemplateTester>,
}

impl FactorySteps {
    pub fn new(
        collaborators: Arc<dyn PublishCollaborators>,
        control: Arc<ControlPlane>,
        tester: Arc<dyn TemplateTester>,
    ) -> Self {
        Self {
            collaborators,
            control,
            tester,
        }
    }

    async fn collaborator_step(&self, step: StepName, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        let result = self.collaborators.perform(step, &ctx.project).await?;
        let mut outcome = StepOutcome::new(result.clone());

        if step == StepName::LocalTest {
            outcome = outcome.with_report(local_report(ctx, &result));
        }
        if step.publishes() {
            outcome = outcome.with_publish(PublishRecord::from_result(ctx.project.id, step, &result));
        }
        Ok(outcome)
    }

    async fn publish_emcp(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        let project = &ctx.project;
        let payload = template_payload(project);
        let upsert = self
            .control
            .create_or_update_template(project.package_name(), payload)
            .await
            .map_err(|e| StepError::new(format!("template publish failed: {}", e)))?;

        let harness = self.tester.test_template(&upsert.template_id).await;
        if !harness.is_success() {
            warn!(
                "Template {} published but capability test failed: {}",
                upsert.template_id,
                harness.summary()
            );
        }
        let report = harness.to_test_report(project.id, TestType::Platform, EMCP_PLATFORM);

        let mut record = PublishRecord::new(project.id, StepName::Emcp);
        record.package_id = Some(upsert.template_id.clone());
        record.version = project.meta("version").map(String::from);

        let retries: Vec<String> = upsert
            .delivered
            .retries
            .iter()
            .map(|r| format!("attempt {}: {} -> {}", r.attempt, r.policy, r.decision))
            .collect();

        Ok(StepOutcome::new(json!({
            "template_id": upsert.template_id,
            "created": upsert.created,
            "route_prefix": upsert.route_prefix,
            "retries": retries,
            "capability_test": {
                "success": harness.is_success(),
                "success_rate": harness.success_rate(),
                "summary": harness.summary(),
            },
        }))
        .with_publish(record)
        .with_report(report))
    }

    async fn online_test(&self, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        // Latest listing per platform
        let mut listings: Vec<&PublishRecord> = Vec::new();
        for record in ctx.marketplace_records() {
            listings.retain(|r| r.target != record.target);
            listings.push(record);
        }

        let mut reports = Vec::new();
        for record in listings {
            let report = if record.target == EMCP_PLATFORM {
                self.test_emcp_listing(ctx, record).await
            } else {
                self.verify_listing(ctx, record).await
            };
            info!(
                "Online test on {}: {}",
                record.target,
                report.status.as_str()
            );
            reports.push(report);
        }

        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| r.status != ReportStatus::Success)
            .filter_map(|r| r.platform.as_deref())
            .collect();
        if !failed.is_empty() {
            return Err(StepError::new(format!(
                "online test failed on {}",
                failed.join(", ")
            ))
            .with_reports(reports));
        }

        let platforms: Vec<&str> = reports.iter().filter_map(|r| r.platform.as_deref()).collect();
        let data = json!({ "platforms": platforms });
        Ok(reports
            .into_iter()
            .fold(StepOutcome::new(data), StepOutcome::with_report))
    }

    async fn test_emcp_listing(&self, ctx: &StepContext, record: &PublishRecord) -> TestReport {
        match &record.package_id {
            Some(template_id) => self
                .tester
                .test_template(template_id)
                .await
                .to_test_report(ctx.project.id, TestType::Online, EMCP_PLATFORM),
            None => TestReport::new(ctx.project.id, TestType::Online, ReportStatus::Failed)
                .on_platform(EMCP_PLATFORM)
                .with_error("publish record has no template id"),
        }
    }

    async fn verify_listing(&self, ctx: &StepContext, record: &PublishRecord) -> TestReport {
        let base = |status| {
            TestReport::new(ctx.project.id, TestType::Online, status).on_platform(record.target.clone())
        };
        match self.collaborators.verify_listing(&ctx.project, record).await {
            Ok(check) if check.ok => base(ReportStatus::Success)
                .with_counts(1, 0, 0)
                .with_raw(check.detail),
            Ok(check) => base(ReportStatus::Failed)
                .with_counts(0, 1, 0)
                .with_raw(check.detail)
                .with_error("listing check failed"),
            Err(e) => base(ReportStatus::Failed)
                .with_counts(0, 1, 0)
                .with_error(format!("{:#}", e)),
        }
    }
}

fn count(result: &Value, key: &str) -> u32 {
    result
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// Local test report from a collaborator's `passed`/`failed`/`skipped` counts
fn local_report(ctx: &StepContext, result: &Value) -> TestReport {
    let passed = count(result, "passed");
    let failed = count(result, "failed");
    let skipped = count(result, "skipped");
    let explicit_failure = result.get("status").and_then(|s| s.as_str()) == Some("failed");
    let status = if failed == 0 && !explicit_failure {
        ReportStatus::Success
    } else {
        ReportStatus::Failed
    };

    let mut report = TestReport::new(ctx.project.id, TestType::Local, status)
        .with_counts(passed, failed, skipped)
        .with_duration_ms(result.get("duration_ms").and_then(|v| v.as_u64()).unwrap_or(0))
        .with_raw(result.clone());
    if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
        report = report.with_error(error);
    }
    report
}

#[async_trait::async_trait]
impl StepRunner for FactorySteps {
    async fn run(&self, step: StepName, ctx: &StepContext) -> Result<StepOutcome, StepError> {
        match step {
            StepName::Emcp => self.publish_emcp(ctx).await,
            StepName::OnlineTest => self.online_test(ctx).await,
            _ => self.collaborator_step(step, ctx).await,
        }
    }
}
