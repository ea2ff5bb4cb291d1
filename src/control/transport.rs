//! Raw request/response exchange with the control-plane API

use crate::control::ControlError;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// One outbound control-plane call, plus the policy hints the resilient
/// layer needs to decide how it may be retried.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Session token, filled in by the resilient layer
    pub token: Option<String>,
    /// Body field holding a caller-chosen identifier that may collide
    pub collision_field: Option<&'static str>,
    /// Whether client errors may be fed to a payload repairer
    pub repairable: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            token: None,
            collision_field: None,
            repairable: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_collision_field(mut self, field: &'static str) -> Self {
        self.collision_field = Some(field);
        self
    }

    pub fn repairable(mut self) -> Self {
        self.repairable = true;
        self
    }

    /// Current value of the collision-prone identifier, if any
    pub fn identifier(&self) -> Option<&str> {
        let field = self.collision_field?;
        self.body.as_ref()?.get(field)?.as_str()
    }
}

/// HTTP status plus decoded body. The body is the `{err_code, err_message, body}`
/// envelope when the server followed its own convention.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Application error code, 0 meaning success. Absent when the body is not an envelope.
    pub fn err_code(&self) -> Option<i64> {
        self.body.get("err_code").and_then(|c| c.as_i64())
    }

    pub fn err_message(&self) -> String {
        match self.body.get("err_message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => match &self.body {
                Value::String(s) => s.clone(),
                _ => String::new(),
            },
        }
    }

    /// The `body` member of the envelope
    pub fn payload(&self) -> &Value {
        self.body.get("body").unwrap_or(&Value::Null)
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.err_code() == Some(401)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.err_code().unwrap_or(0) == 0
    }

    /// Convert a non-successful response into an error
    pub fn rejection(&self) -> ControlError {
        ControlError::Rejected {
            status: self.status,
            code: self.err_code().unwrap_or(0),
            message: self.err_message(),
        }
    }
}

/// Sends a single request with no retry behaviour of its own
#[async_trait::async_trait]
pub trait ControlTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ControlError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait::async_trait]
impl ControlTransport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ControlError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header("Content-Type", "application/json");
        if let Some(token) = &request.token {
            builder = builder.header("token", token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_accessors() {
        let ok = RawResponse::new(200, json!({"err_code": 0, "err_message": "", "body": {"id": 9}}));
        assert!(ok.is_success());
        assert_eq!(ok.payload()["id"], 9);

        let rejected = RawResponse::new(200, json!({"err_code": 1002, "err_message": "bad name"}));
        assert!(!rejected.is_success());
        assert!(!rejected.is_client_error());
        assert_eq!(rejected.err_message(), "bad name");

        let unauthorized = RawResponse::new(401, json!("token expired"));
        assert!(unauthorized.is_auth_failure());
        assert_eq!(unauthorized.err_message(), "token expired");
    }

    #[test]
    fn test_identifier_lookup() {
        let request = ApiRequest::post("/api/Template/create_mcp_template", json!({"route_prefix": "weather"}))
            .with_collision_field("route_prefix");
        assert_eq!(request.identifier(), Some("weather"));
        assert_eq!(ApiRequest::get("/x").identifier(), None);
    }
}
