//! CLI output formatting

use crate::core::{
    LogLevel, OperationLog, PipelineStep, Project, ProjectStatus, PublishRecord, ReportStatus,
    StepStatus, TestReport,
};
use crate::execution::ExecutionEvent;
use crate::harness::{CapabilityStatus, HarnessReport};
use crate::persistence::FactoryStats;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Spinner shown while a long step (publishing, capability testing) runs
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::Pending => style("PENDING").dim().to_string(),
        StepStatus::Running => style("RUNNING").yellow().to_string(),
        StepStatus::Success => style("SUCCESS").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::Skipped => style("SKIPPED").dim().to_string(),
    }
}

/// Format a project status for display
pub fn format_project_status(status: ProjectStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        ProjectStatus::Completed => style(label).green().to_string(),
        ProjectStatus::Failed => style(label).red().to_string(),
        ProjectStatus::Created => style(label).dim().to_string(),
        _ => style(label).cyan().to_string(),
    }
}

/// One line per project for `list`
pub fn format_project_line(project: &Project) -> String {
    let icon = match project.status {
        ProjectStatus::Completed => CHECK,
        ProjectStatus::Failed => CROSS,
        _ => INFO,
    };
    format!(
        "{}{} {} - {} - {}",
        icon,
        style(project.id).dim(),
        style(&project.name).bold(),
        format_project_status(project.status),
        style(project.updated_at.format("%Y-%m-%d %H:%M")).dim()
    )
}

pub fn format_step_line(step: &PipelineStep) -> String {
    let mut line = format!(
        "  {}. {:<12} {}",
        step.order,
        step.name.as_str(),
        format_step_status(step.status)
    );
    if let Some(error) = &step.error {
        line.push_str(&format!(" {}", style(error).red()));
    }
    line
}

pub fn format_report_line(report: &TestReport) -> String {
    let icon = match report.status {
        ReportStatus::Success => CHECK,
        ReportStatus::Failed => CROSS,
    };
    format!(
        "  {}{:<8} {:<8} passed {} partial {} failed {} skipped {} ({} ms)",
        icon,
        report.test_type.as_str(),
        report.platform.as_deref().unwrap_or("-"),
        report.passed,
        report.partial,
        report.failed,
        report.skipped,
        report.duration_ms
    )
}

pub fn format_publish_line(record: &PublishRecord) -> String {
    format!(
        "  {:<8} {} {} {}",
        record.target,
        record.package_id.as_deref().unwrap_or("-"),
        record.version.as_deref().unwrap_or(""),
        style(record.url.as_deref().unwrap_or("")).underlined()
    )
}

pub fn format_log_line(entry: &OperationLog) -> String {
    let level = match entry.level {
        LogLevel::Info => style("INFO ").dim(),
        LogLevel::Warn => style("WARN ").yellow(),
        LogLevel::Error => style("ERROR").red(),
    };
    format!(
        "{} {} {:<11} {}",
        style(entry.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        level,
        entry.step.map(|s| s.as_str()).unwrap_or("-"),
        entry.message
    )
}

pub fn format_stats(stats: &FactoryStats) -> String {
    let mut out = format!("{} {} projects\n", INFO, style(stats.total_projects).bold());
    for (status, count) in &stats.projects_by_status {
        out.push_str(&format!("  {:<10} {}\n", status, count));
    }
    out.push_str("Test reports:\n");
    for (test_type, tally) in &stats.reports_by_type {
        out.push_str(&format!(
            "  {:<10} {} passed, {} failed\n",
            test_type,
            style(tally.passed).green(),
            style(tally.failed).red()
        ));
    }
    out.push_str("Publishes:\n");
    for (target, count) in &stats.publishes_by_target {
        out.push_str(&format!("  {:<10} {}\n", target, count));
    }
    out
}

/// Capability harness report for `test-template`
pub fn format_harness_report(report: &HarnessReport) -> String {
    let icon = if report.is_success() { CHECK } else { CROSS };
    let mut out = format!(
        "{}Template {}: {}\n",
        icon,
        style(&report.template_id).bold(),
        report.summary()
    );
    for phase in &report.phases {
        let mark = if phase.ok { CHECK } else { CROSS };
        out.push_str(&format!(
            "  {}{:<26} {} ({} ms)\n",
            mark, phase.phase.to_string(), phase.detail, phase.elapsed_ms
        ));
    }
    for capability in &report.capabilities {
        let status = match capability.status {
            CapabilityStatus::Passed => style(capability.status.to_string()).green(),
            CapabilityStatus::Partial => style(capability.status.to_string()).yellow(),
            _ => style(capability.status.to_string()).red(),
        };
        out.push_str(&format!("    {:<24} {}\n", capability.name, status));
    }
    for line in &report.diagnostics {
        out.push_str(&format!("  {}{}\n", WARN, line));
    }
    out
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::ProjectStarted {
            project_id,
            project_name,
            from,
        } => match from {
            Some(step) => format!(
                "{}Running {} ({}) from {}",
                ROCKET,
                style(project_name).bold(),
                style(project_id).dim(),
                style(step).cyan()
            ),
            None => format!(
                "{}Running {} ({})",
                ROCKET,
                style(project_name).bold(),
                style(project_id).dim()
            ),
        },
        ExecutionEvent::StepSkipped { step, reason } => {
            format!("{}{} ({})", SKIP, style(step).dim(), reason)
        }
        ExecutionEvent::StepStarted { step } => format!("{}{}", SPINNER, style(step).cyan()),
        ExecutionEvent::StepSucceeded { step, .. } => format!("{}{}", CHECK, style(step).green()),
        ExecutionEvent::StepFailed { failure } => format!(
            "{}{} [{}]: {}",
            CROSS,
            style(failure.step()).red(),
            failure.kind(),
            style(failure).dim()
        ),
        ExecutionEvent::StepAborted { step, after } => format!(
            "{}{} not run ({} failed)",
            WARN,
            style(step).dim(),
            after
        ),
        ExecutionEvent::ProjectFinished { status, .. } => {
            format!("{}Pipeline finished: {}", INFO, format_project_status(*status))
        }
    }
}
