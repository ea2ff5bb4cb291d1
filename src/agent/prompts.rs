//! Agent-backed repairer and synthesizer

use crate::agent::AgentExecutor;
use crate::control::PayloadRepairer;
use crate::harness::{ArgumentSynthesizer, CapabilityDescriptor};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn repair_prompt(payload: &Value, error_response: &Value, error_code: i64) -> String {
    format!(
        r#"A marketplace API rejected a template payload. Diagnose the problem and fix the payload.

Typical causes: a field has the wrong type, a required field is missing, a value breaks a field rule, or a multilingual field is not an array of {{"type", "content"}} entries (type 1 = simplified Chinese, 2 = traditional Chinese, 3 = English).

## Error code
{code}

## Error response
```json
{error}
```

## Payload sent
```json
{payload}
```

Reply with a single JSON object of the form {{"fixed_template_data": <complete corrected payload>}}. Reply {{"fixed_template_data": null}} if the payload cannot be fixed."#,
        code = error_code,
        error = pretty(error_response),
        payload = pretty(payload),
    )
}

pub fn synthesis_prompt(capability: &CapabilityDescriptor) -> String {
    format!(
        r#"Produce realistic example arguments for one call of the tool below.

Tool: {name}
Description: {description}
Input schema:
```json
{schema}
```

Reply with a single JSON object mapping every required input to a concrete value. No commentary."#,
        name = capability.name,
        description = capability.description.as_deref().unwrap_or("(none)"),
        schema = pretty(&capability.input_schema),
    )
}

/// Asks the agent to fix rejected payloads
pub struct AgentRepairer {
    agent: Arc<dyn AgentExecutor>,
}

impl AgentRepairer {
    pub fn new(agent: Arc<dyn AgentExecutor>) -> Self {
        Self { agent }
    }
}

#[async_trait::async_trait]
impl PayloadRepairer for AgentRepairer {
    async fn repair(&self, payload: &Value, error_response: &Value, error_code: i64) -> Option<Value> {
        let prompt = repair_prompt(payload, error_response, error_code);
        let response = match self.agent.execute(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Payload repair agent failed: {}", e);
                return None;
            }
        };
        response
            .json()?
            .get("fixed_template_data")
            .filter(|v| v.is_object())
            .cloned()
    }
}

/// Asks the agent for example capability arguments
pub struct AgentSynthesizer {
    agent: Arc<dyn AgentExecutor>,
}

impl AgentSynthesizer {
    pub fn new(agent: Arc<dyn AgentExecutor>) -> Self {
        Self { agent }
    }
}

#[async_trait::async_trait]
impl ArgumentSynthesizer for AgentSynthesizer {
    async fn synthesize(&self, capability: &CapabilityDescriptor) -> Option<Value> {
        match self.agent.execute(&synthesis_prompt(capability)).await {
            Ok(response) => response.json(),
            Err(e) => {
                warn!("Argument synthesis for {} failed: {}", capability.name, e);
                None
            }
        }
    }
}
