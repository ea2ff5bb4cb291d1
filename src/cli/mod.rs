//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CreateCommand, ListCommand, LogsCommand, RunCommand, StatsCommand, StatusCommand, StepCommand,
    TestTemplateCommand,
};
use std::ffi::OsString;

/// Publish MCP servers to package registries and marketplaces
#[derive(Debug, Parser, Clone)]
#[command(name = "mcp-factory")]
#[command(version = "0.1.0")]
#[command(about = "Publish MCP servers to registries and marketplaces", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to factory configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Create a project
    Create(CreateCommand),

    /// Run a project's pipeline
    Run(RunCommand),

    /// Run a single step
    Step(StepCommand),

    /// Show project status
    Status(StatusCommand),

    /// List projects
    List(ListCommand),

    /// Show the operation log
    Logs(LogsCommand),

    /// Show aggregate statistics
    Stats(StatsCommand),

    /// Test a template's capabilities
    TestTemplate(TestTemplateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepName;

    #[test]
    fn test_parse_run_from() {
        let cli = Cli::try_parse_from(["mcp-factory", "-v", "run", "abc", "--from", "github"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.project, "abc");
                assert_eq!(run.from, Some(StepName::Github));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_create_with_meta() {
        let cli = Cli::try_parse_from([
            "mcp-factory",
            "create",
            "--name",
            "weather",
            "--source",
            "https://github.com/acme/weather",
            "--meta",
            "package_name=weather-mcp",
            "--meta",
            "package_type=pypi",
        ])
        .unwrap();
        match cli.command {
            Command::Create(create) => assert_eq!(create.meta.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_test_template_subcommand_name() {
        let cli = Cli::try_parse_from(["mcp-factory", "test-template", "tpl-1"]).unwrap();
        assert!(matches!(cli.command, Command::TestTemplate(_)));
    }
}
