//! Factory configuration from YAML

use crate::core::StepName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, constructed once and passed down explicitly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Control-plane API access
    pub control_plane: ControlPlaneConfig,

    /// Capability test harness timings
    pub harness: HarnessConfig,

    /// Payload repair budget
    pub repair: RetryBudget,

    /// Identifier collision budget
    pub collision: CollisionBudget,

    /// External helper used for payload repair and argument synthesis
    pub agent: Option<AgentConfig>,

    /// Where pipeline records are stored
    pub database: DatabaseConfig,

    /// Shell commands backing the collaborator steps
    pub steps: HashMap<StepName, StepCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub phone_number: String,
    pub user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sit-emcp.kaleido.guru".to_string(),
            phone_number: String::new(),
            user_id: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl ControlPlaneConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Timings for provisioning, readiness polling and capability calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How long `open` waits for the session announcement
    pub session_timeout_secs: u64,
    /// Pause between readiness attempts
    pub ready_interval_secs: u64,
    /// Total readiness budget
    pub ready_ceiling_secs: u64,
    pub list_timeout_secs: u64,
    pub invoke_timeout_secs: u64,
    /// Minimum weighted pass rate, 0.0..=1.0
    pub pass_threshold: f64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 10,
            ready_interval_secs: 5,
            ready_ceiling_secs: 60,
            list_timeout_secs: 30,
            invoke_timeout_secs: 60,
            pass_threshold: 0.5,
        }
    }
}

impl HarnessConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_secs(self.ready_interval_secs)
    }

    pub fn ready_ceiling(&self) -> Duration {
        Duration::from_secs(self.ready_ceiling_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub max_attempts: usize,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionBudget {
    pub max_attempts: usize,
}

impl Default for CollisionBudget {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// External helper process invoked with a prompt on stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
}

fn default_agent_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `:memory:` selects the in-memory store; absent uses the data-local default
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.path.as_deref() == Some(":memory:")
    }

    /// Resolved on-disk location
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref() {
            Some(":memory:") => None,
            Some(p) => Some(PathBuf::from(p)),
            None => dirs::data_local_dir().map(|d| d.join("mcp-factory").join("factory.db")),
        }
    }
}

/// A shell command run for a collaborator step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,
    /// Command used by online verification for this marketplace, if any
    #[serde(default)]
    pub verify: Option<String>,
}

fn default_step_timeout() -> u64 {
    600
}

impl FactoryConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FactoryConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.control_plane.base_url.trim().is_empty() {
            anyhow::bail!("control_plane.base_url must not be empty");
        }
        if self.control_plane.request_timeout_secs == 0 {
            anyhow::bail!("control_plane.request_timeout_secs must be greater than zero");
        }

        let h = &self.harness;
        for (name, value) in [
            ("session_timeout_secs", h.session_timeout_secs),
            ("ready_ceiling_secs", h.ready_ceiling_secs),
            ("list_timeout_secs", h.list_timeout_secs),
            ("invoke_timeout_secs", h.invoke_timeout_secs),
        ] {
            if value == 0 {
                anyhow::bail!("harness.{} must be greater than zero", name);
            }
        }
        if !(0.0..=1.0).contains(&h.pass_threshold) {
            anyhow::bail!(
                "harness.pass_threshold must be between 0 and 1, got {}",
                h.pass_threshold
            );
        }

        for (step, cmd) in &self.steps {
            if !step.is_collaborator_backed() {
                anyhow::bail!("step '{}' is not driven by a shell command", step);
            }
            if cmd.command.trim().is_empty() {
                anyhow::bail!("step '{}' has an empty command", step);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = FactoryConfig::from_yaml("{}").unwrap();
        assert_eq!(config.harness.ready_interval_secs, 5);
        assert_eq!(config.harness.ready_ceiling_secs, 60);
        assert_eq!(config.harness.invoke_timeout_secs, 60);
        assert_eq!(config.repair.max_attempts, 3);
        assert_eq!(config.collision.max_attempts, 5);
        assert!(config.agent.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
control_plane:
  base_url: "https://emcp.example.com"
  phone_number: "13800000000"
  user_id: "42"
harness:
  ready_ceiling_secs: 30
  pass_threshold: 0.8
agent:
  command: "helper"
  args: ["--json"]
database:
  path: ":memory:"
steps:
  github:
    command: "./publish-github.sh"
  lobehub:
    command: "./submit-lobehub.sh"
    verify: "./verify-lobehub.sh"
"#;

        let config = FactoryConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.control_plane.base_url, "https://emcp.example.com");
        assert_eq!(config.harness.ready_ceiling_secs, 30);
        assert_eq!(config.harness.session_timeout_secs, 10);
        assert_eq!(config.agent.as_ref().unwrap().timeout_secs, 120);
        assert!(config.database.is_in_memory());
        assert_eq!(
            config.steps[&StepName::Lobehub].verify.as_deref(),
            Some("./verify-lobehub.sh")
        );
    }

    #[test]
    fn test_threshold_out_of_range_fails() {
        let yaml = "harness:\n  pass_threshold: 1.5\n";
        let err = FactoryConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("pass_threshold"));
    }

    #[test]
    fn test_zero_ceiling_fails() {
        let yaml = "harness:\n  ready_ceiling_secs: 0\n";
        assert!(FactoryConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_command_for_engine_driven_step_fails() {
        let yaml = r#"
steps:
  emcp:
    command: "nope"
"#;
        assert!(FactoryConfig::from_yaml(yaml).is_err());
    }
}
