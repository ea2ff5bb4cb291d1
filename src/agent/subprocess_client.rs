//! Subprocess client - runs an external helper with input on stdin

use crate::agent::AgentError;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs one external program per request and captures its stdout
#[derive(Debug, Clone)]
pub struct SubprocessClient {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout_secs: u64,
}

impl SubprocessClient {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
            timeout_secs,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the program, write `input` to its stdin, and return stdout.
    ///
    /// # Errors
    /// Returns `AgentError` if:
    /// - the program cannot be spawned
    /// - it exits with a non-zero status
    /// - the output is not valid UTF-8
    /// - it does not finish within the timeout
    pub async fn execute(&self, input: &str) -> Result<String, AgentError> {
        debug!(
            "Spawning {} with {} bytes of input",
            self.program,
            input.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Internal(format!("Failed to spawn {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            if !input.is_empty() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| AgentError::Internal(format!("Failed to write stdin: {}", e)))?;
            }
            // Dropping closes the pipe so the child sees EOF
        }

        let output = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| AgentError::Timeout(self.timeout_secs))?
            .map_err(|e| AgentError::Internal(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("{} exited with code {}: {}", self.program, exit_code, stderr.trim());
            return Err(AgentError::Api(format!(
                "{} exited with code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            )));
        }

        let content = String::from_utf8(output.stdout)
            .map_err(|e| AgentError::Internal(format!("Failed to decode output: {}", e)))?;
        debug!("{} returned {} bytes of output", self.program, content.len());

        Ok(content)
    }
}
