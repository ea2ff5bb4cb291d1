use anyhow::{Context, Result};
use mcp_factory::agent::{AgentExecutor, AgentRepairer, AgentSynthesizer, HelperAgentClient};
use mcp_factory::cli::commands::{
    CreateCommand, ListCommand, LogsCommand, RunCommand, StatsCommand, StatusCommand, StepCommand,
    TestTemplateCommand,
};
use mcp_factory::cli::output::*;
use mcp_factory::cli::{Cli, Command};
use mcp_factory::control::{ControlPlane, HttpTransport, ResilientClient};
use mcp_factory::core::config::FactoryConfig;
use mcp_factory::core::{Project, TestType};
use mcp_factory::execution::{
    CommandCollaborators, ExecutionEvent, FactorySteps, PipelineEngine, RunSummary,
};
use mcp_factory::harness::{CapabilityTestHarness, SseConnector};
use mcp_factory::persistence::{InMemoryStore, PipelineStore};
use std::sync::{Arc, Mutex};
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Create(cmd) => create_project(cmd, &config).await?,
        Command::Run(cmd) => run_pipeline(cmd, &config).await?,
        Command::Step(cmd) => run_single_step(cmd, &config).await?,
        Command::Status(cmd) => show_status(cmd, &config).await?,
        Command::List(cmd) => list_projects(cmd, &config).await?,
        Command::Logs(cmd) => show_logs(cmd, &config).await?,
        Command::Stats(cmd) => show_stats(cmd, &config).await?,
        Command::TestTemplate(cmd) => test_template(cmd, &config).await?,
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<FactoryConfig> {
    let config = match path {
        Some(path) => FactoryConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => FactoryConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &FactoryConfig) -> Result<Arc<dyn PipelineStore>> {
    if config.database.is_in_memory() {
        return Ok(Arc::new(InMemoryStore::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        if let Some(path) = config.database.resolved_path() {
            let store = mcp_factory::persistence::SqliteStore::at_path(&path)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            return Ok(Arc::new(store));
        }
    }

    warn!("No database available; state will not outlive this process");
    Ok(Arc::new(InMemoryStore::new()))
}

fn helper_agent(config: &FactoryConfig) -> Option<Arc<dyn AgentExecutor>> {
    config
        .agent
        .as_ref()
        .map(|agent| Arc::new(HelperAgentClient::new(agent)) as Arc<dyn AgentExecutor>)
}

fn build_control(config: &FactoryConfig) -> Result<Arc<ControlPlane>> {
    let plane = &config.control_plane;
    let transport = HttpTransport::new(plane.base_url.clone(), plane.request_timeout())?;
    let mut client = ResilientClient::new(Arc::new(transport), plane.phone_number.clone())
        .with_collision_budget(config.collision.max_attempts)
        .with_repair_budget(config.repair.max_attempts);
    if let Some(agent) = helper_agent(config) {
        client = client.with_repairer(Arc::new(AgentRepairer::new(agent)));
    }
    Ok(Arc::new(ControlPlane::new(client, plane.user_id.clone())))
}

fn build_harness(config: &FactoryConfig, control: Arc<ControlPlane>) -> CapabilityTestHarness {
    let harness = CapabilityTestHarness::new(control, Arc::new(SseConnector), config.harness.clone());
    match helper_agent(config) {
        Some(agent) => harness.with_synthesizer(Arc::new(AgentSynthesizer::new(agent))),
        None => harness,
    }
}

async fn build_engine(config: &FactoryConfig) -> Result<(PipelineEngine, Arc<dyn PipelineStore>)> {
    let store = open_store(config).await?;
    let control = build_control(config)?;
    let harness = Arc::new(build_harness(config, control.clone()));
    let steps = FactorySteps::new(
        Arc::new(CommandCollaborators::new(config.steps.clone())),
        control,
        harness,
    );
    Ok((PipelineEngine::new(store.clone(), Arc::new(steps)), store))
}

fn parse_project_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).context("Invalid project ID format")
}

/// Print engine events, with a spinner while a step runs
fn attach_console(engine: &mut PipelineEngine) {
    let current = Arc::new(Mutex::new(None::<indicatif::ProgressBar>));
    engine.add_event_handler(move |event| {
        let Ok(mut slot) = current.lock() else {
            return;
        };
        if let Some(spinner) = slot.take() {
            spinner.finish_and_clear();
        }
        println!("{}", format_execution_event(&event));
        if let ExecutionEvent::StepStarted { step } = &event {
            *slot = Some(create_spinner(format!("running {}", step)));
        }
    });
}

fn print_summary(summary: &RunSummary) {
    match &summary.failure {
        None => println!(
            "\n{}{} steps run, project {}",
            CHECK,
            summary.executed.len(),
            format_project_status(summary.status)
        ),
        Some(failure) => {
            println!(
                "\n{}Stopped at {} [{}], project {}",
                CROSS,
                style(failure.step()).bold(),
                failure.kind(),
                format_project_status(summary.status)
            );
            error!("{}", failure);
        }
    }
}

async fn create_project(cmd: &CreateCommand, config: &FactoryConfig) -> Result<()> {
    let (engine, _) = build_engine(config).await?;

    let mut project = Project::new(cmd.name.clone(), cmd.source.clone());
    if let Some(path) = &cmd.path {
        project = project.with_artifact_path(path.clone());
    }
    for (key, value) in &cmd.meta {
        project = project.with_metadata(key.clone(), value.clone());
    }
    engine.create_project(&project).await?;

    println!(
        "{}Created {} ({})",
        CHECK,
        style(&project.name).bold(),
        style(project.id).cyan()
    );
    Ok(())
}

async fn run_pipeline(cmd: &RunCommand, config: &FactoryConfig) -> Result<()> {
    let project_id = parse_project_id(&cmd.project)?;
    let (mut engine, _) = build_engine(config).await?;
    attach_console(&mut engine);

    let summary = engine.run(project_id, cmd.from).await?;
    print_summary(&summary);
    if !summary.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_single_step(cmd: &StepCommand, config: &FactoryConfig) -> Result<()> {
    let project_id = parse_project_id(&cmd.project)?;
    let (mut engine, _) = build_engine(config).await?;
    attach_console(&mut engine);

    let summary = engine.run_step(project_id, cmd.step).await?;
    print_summary(&summary);
    if !summary.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn show_status(cmd: &StatusCommand, config: &FactoryConfig) -> Result<()> {
    let project_id = parse_project_id(&cmd.project)?;
    let store = open_store(config).await?;
    let project = match store.get_project(project_id).await? {
        Some(project) => project,
        None => {
            println!("{}Project not found", WARN);
            return Ok(());
        }
    };
    let steps = store.get_steps(project_id).await?;
    let reports = store.list_test_reports(project_id).await?;
    let records = store.list_publish_records(project_id).await?;

    if cmd.json {
        let data = serde_json::json!({
            "project": project,
            "steps": steps,
            "test_reports": reports,
            "publish_records": records,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{}", format_project_line(&project));
    println!("\n  {}", style("Steps").bold());
    for step in &steps {
        println!("{}", format_step_line(step));
    }
    if !reports.is_empty() {
        println!("\n  {}", style("Test reports").bold());
        for report in &reports {
            println!("{}", format_report_line(report));
        }
    }
    if !records.is_empty() {
        println!("\n  {}", style("Published").bold());
        for record in &records {
            println!("{}", format_publish_line(record));
        }
    }
    let local_ok = store.has_passed_test(project_id, TestType::Local).await?;
    println!(
        "\n  Local tests passing: {}",
        if local_ok { style("yes").green() } else { style("no").red() }
    );
    Ok(())
}

async fn list_projects(cmd: &ListCommand, config: &FactoryConfig) -> Result<()> {
    let store = open_store(config).await?;
    let projects = store.list_projects(cmd.status).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("{}No projects found", INFO);
        return Ok(());
    }
    for project in &projects {
        println!("{}", format_project_line(project));
    }
    Ok(())
}

async fn show_logs(cmd: &LogsCommand, config: &FactoryConfig) -> Result<()> {
    let project_id = parse_project_id(&cmd.project)?;
    let store = open_store(config).await?;
    let logs = store.list_logs(project_id, cmd.limit).await?;

    if logs.is_empty() {
        println!("{}No log entries", INFO);
        return Ok(());
    }
    for entry in &logs {
        println!("{}", format_log_line(entry));
    }
    Ok(())
}

async fn show_stats(cmd: &StatsCommand, config: &FactoryConfig) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", format_stats(&stats));
    }
    Ok(())
}

async fn test_template(cmd: &TestTemplateCommand, config: &FactoryConfig) -> Result<()> {
    let control = build_control(config)?;
    let harness = build_harness(config, control);

    let spinner = create_spinner(format!("testing template {}", cmd.template_id));
    let report = harness.run(&cmd.template_id).await;
    spinner.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_harness_report(&report));
    }
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
