//! Agent response types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error types for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Response from the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The raw response text
    pub content: String,
}

impl AgentResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// The JSON value the response carries, if any
    pub fn json(&self) -> Option<Value> {
        extract_json_block(&self.content)
    }
}

/// Find a JSON object in free text: a fenced ```json block, the whole text,
/// or the outermost `{...}` span, in that order.
pub fn extract_json_block(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(|v| v.is_object())
}
