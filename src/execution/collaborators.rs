//! External collaborators behind the non-marketplace-control steps
//!
//! Crawling, conversion, packaging and third-party listing are done by
//! outside tools. Each one is a configured shell command that sees the
//! project through environment variables and reports a JSON object on
//! stdout.

use crate::agent::{extract_json_block, SubprocessClient};
use crate::core::config::StepCommand;
use crate::core::{Project, PublishRecord, StepName};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of checking that a published listing is live
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCheck {
    pub ok: bool,
    pub detail: Value,
}

/// Performs collaborator-backed steps and verifies third-party listings
#[async_trait::async_trait]
pub trait PublishCollaborators: Send + Sync {
    /// Run `step` for `project` and return its structured result
    async fn perform(&self, step: StepName, project: &Project) -> Result<Value>;

    /// Check that a listing recorded by a marketplace step is live
    async fn verify_listing(&self, project: &Project, record: &PublishRecord) -> Result<ListingCheck>;
}

/// Collaborators backed by the `steps` section of the configuration
#[derive(Debug, Clone, Default)]
pub struct CommandCollaborators {
    commands: HashMap<StepName, StepCommand>,
}

impl CommandCollaborators {
    pub fn new(commands: HashMap<StepName, StepCommand>) -> Self {
        Self { commands }
    }

    fn client(&self, program: &str, args: Vec<String>, timeout_secs: u64, project: &Project) -> SubprocessClient {
        let mut client = SubprocessClient::new(program, args, timeout_secs)
            .with_env("FACTORY_PROJECT_ID", project.id.to_string())
            .with_env("FACTORY_NAME", project.name.clone())
            .with_env("FACTORY_SOURCE", project.source.clone())
            .with_env("FACTORY_PACKAGE_NAME", project.package_name());
        if let Some(path) = &project.artifact_path {
            client = client.with_env("FACTORY_ARTIFACT_PATH", path.clone());
        }
        for (key, value) in &project.metadata {
            client = client.with_env(format!("FACTORY_META_{}", env_key(key)), value.clone());
        }
        client
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// The last line of `stdout` that parses as a JSON object, else any
/// object embedded in the text, else the trimmed text itself.
pub fn last_json_object(stdout: &str) -> Value {
    stdout
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .find(|v| v.is_object())
        .or_else(|| extract_json_block(stdout))
        .unwrap_or_else(|| json!({ "output": stdout.trim() }))
}

#[async_trait::async_trait]
impl PublishCollaborators for CommandCollaborators {
    async fn perform(&self, step: StepName, project: &Project) -> Result<Value> {
        let command = self
            .commands
            .get(&step)
            .with_context(|| format!("No command configured for step '{}'", step))?;
        info!("Running {} collaborator: {}", step, command.command);

        let stdout = self
            .client(&command.command, command.args.clone(), command.timeout_secs, project)
            .execute("")
            .await
            .with_context(|| format!("{} command failed", step))?;
        debug!("{} collaborator wrote {} bytes", step, stdout.len());
        Ok(last_json_object(&stdout))
    }

    async fn verify_listing(&self, project: &Project, record: &PublishRecord) -> Result<ListingCheck> {
        let verify = record
            .target_step()
            .and_then(|target| self.commands.get(&target))
            .and_then(|command| command.verify.as_ref().map(|v| (command, v)));

        let (command, script) = match verify {
            Some(found) => found,
            None => {
                return Ok(ListingCheck {
                    ok: record.url.is_some(),
                    detail: json!({
                        "target": record.target,
                        "url": record.url,
                        "checked": "listing url recorded",
                    }),
                })
            }
        };

        let mut client = self.client(
            "sh",
            vec!["-c".to_string(), script.clone()],
            command.timeout_secs,
            project,
        );
        if let Some(url) = &record.url {
            client = client.with_env("FACTORY_LISTING_URL", url.clone());
        }
        if let Some(package_id) = &record.package_id {
            client = client.with_env("FACTORY_PACKAGE_ID", package_id.clone());
        }

        match client.execute("").await {
            Ok(stdout) => {
                let detail = last_json_object(&stdout);
                let ok = detail.get("ok").and_then(|v| v.as_bool()).unwrap_or(true)
                    && detail.get("failed").and_then(|v| v.as_u64()).unwrap_or(0) == 0;
                Ok(ListingCheck { ok, detail })
            }
            Err(e) => Ok(ListingCheck {
                ok: false,
                detail: json!({ "target": record.target, "error": e.to_string() }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> StepCommand {
        StepCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs: 10,
            verify: None,
        }
    }

    #[test]
    fn test_last_json_object() {
        let out = "building...\n{\"stage\": 1}\nuploaded\n{\"url\": \"https://pypi.org/p/x\"}\n";
        assert_eq!(last_json_object(out)["url"], "https://pypi.org/p/x");
        assert_eq!(last_json_object("done")["output"], "done");
    }

    #[tokio::test]
    async fn test_perform_exports_project_fields() {
        let mut commands = HashMap::new();
        commands.insert(
            StepName::Pypi,
            sh("echo log line; printf '{\"package_id\": \"%s\", \"tier\": \"%s\"}\\n' \"$FACTORY_PACKAGE_NAME\" \"$FACTORY_META_TIER\""),
        );
        let collaborators = CommandCollaborators::new(commands);
        let project = Project::new("Weather", "src")
            .with_metadata("package_name", "weather-mcp")
            .with_metadata("tier", "free");

        let result = collaborators.perform(StepName::Pypi, &project).await.unwrap();
        assert_eq!(result["package_id"], "weather-mcp");
        assert_eq!(result["tier"], "free");
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let collaborators = CommandCollaborators::default();
        let project = Project::new("Weather", "src");
        let err = collaborators.perform(StepName::Crawl, &project).await.unwrap_err();
        assert!(err.to_string().contains("crawl"));
    }

    #[tokio::test]
    async fn test_verify_listing() {
        let mut with_verify = sh("true");
        with_verify.verify = Some("echo '{\"ok\": false}'".to_string());
        let mut commands = HashMap::new();
        commands.insert(StepName::Lobehub, with_verify);
        let collaborators = CommandCollaborators::new(commands);
        let project = Project::new("Weather", "src");

        let lobehub = PublishRecord::new(project.id, StepName::Lobehub);
        let check = collaborators.verify_listing(&project, &lobehub).await.unwrap();
        assert!(!check.ok);

        let mut mcpso = PublishRecord::new(project.id, StepName::Mcpso);
        assert!(!collaborators.verify_listing(&project, &mcpso).await.unwrap().ok);
        mcpso.url = Some("https://mcp.so/server/weather".into());
        assert!(collaborators.verify_listing(&project, &mcpso).await.unwrap().ok);
    }
}
