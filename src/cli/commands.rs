//! CLI command definitions

use crate::core::{ProjectStatus, StepName};
use clap::Args;

/// Create a project with all steps pending
#[derive(Debug, Args, Clone)]
pub struct CreateCommand {
    /// Project name
    #[arg(short, long)]
    pub name: String,

    /// Where the project comes from (repository URL or path)
    #[arg(short, long)]
    pub source: String,

    /// Local artifact path
    #[arg(short, long)]
    pub path: Option<String>,

    /// Metadata entries (key=value)
    #[arg(long = "meta", value_parser = parse_key_value)]
    pub meta: Vec<(String, String)>,
}

/// Run a project's pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Project id
    pub project: String,

    /// Step to start from; earlier unfinished steps are skipped
    #[arg(long, value_parser = parse_step)]
    pub from: Option<StepName>,
}

/// Run a single step
#[derive(Debug, Args, Clone)]
pub struct StepCommand {
    /// Project id
    pub project: String,

    /// Step name
    #[arg(value_parser = parse_step)]
    pub step: StepName,
}

/// Show a project's steps, reports and publish records
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Project id
    pub project: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List projects
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Only projects with this status
    #[arg(long, value_parser = parse_project_status)]
    pub status: Option<ProjectStatus>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show a project's operation log
#[derive(Debug, Args, Clone)]
pub struct LogsCommand {
    /// Project id
    pub project: String,

    /// Number of recent entries to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
}

/// Aggregate counts
#[derive(Debug, Args, Clone)]
pub struct StatsCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Run the capability harness against one template
#[derive(Debug, Args, Clone)]
pub struct TestTemplateCommand {
    /// Template id
    pub template_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

fn parse_step(s: &str) -> Result<StepName, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_project_status(s: &str) -> Result<ProjectStatus, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}
