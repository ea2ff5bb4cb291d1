//! JSON-RPC envelopes carried over the event stream

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request envelope
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Any inbound envelope: a response, a server request or a notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcMessage {
    pub fn response(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(Value::from(id)),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error_response(id: u64, error: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: Some(Value::from(id)),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Correlation id as a number, accepting numeric strings
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn answers(&self, id: u64) -> bool {
        self.is_response() && self.numeric_id() == Some(id)
    }

    /// Carries an id and no method
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }
}

/// A callable capability as enumerated by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

/// Pull the capability list out of a `tools/list` result
pub fn capabilities_from_result(result: &Value) -> Result<Vec<CapabilityDescriptor>, serde_json::Error> {
    let tools = result.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(tools)
}
