//! External helper agent
//!
//! An opaque helper program (typically an LLM wrapper) that receives a
//! prompt on stdin and answers on stdout. It backs the payload repairer and
//! the argument synthesizer; the pipeline works without one.

pub mod prompts;
pub mod response;
pub mod subprocess_client;

use crate::core::config::AgentConfig;
use async_trait::async_trait;
pub use prompts::{AgentRepairer, AgentSynthesizer};
pub use response::{extract_json_block, AgentError, AgentResponse};
pub use subprocess_client::SubprocessClient;

/// Trait for agent execution - allows for different implementations
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, prompt: &str) -> Result<AgentResponse, AgentError>;
}

/// Agent that runs the configured helper command
#[derive(Debug, Clone)]
pub struct HelperAgentClient {
    subprocess_client: SubprocessClient,
}

impl HelperAgentClient {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            subprocess_client: SubprocessClient::new(
                config.command.clone(),
                config.args.clone(),
                config.timeout_secs,
            ),
        }
    }
}

#[async_trait]
impl AgentExecutor for HelperAgentClient {
    async fn execute(&self, prompt: &str) -> Result<AgentResponse, AgentError> {
        let content = self.subprocess_client.execute(prompt).await?;
        Ok(AgentResponse::new(content))
    }
}
