//! Bounded retry policies around control-plane calls
//!
//! Three independent policies may fire on a single logical call, checked in
//! this order on every response:
//!
//! 1. auth: re-authenticate once on an authorization failure,
//! 2. collision: rename a caller-chosen identifier that is already taken,
//! 3. repair: hand a rejected payload to a [`PayloadRepairer`].
//!
//! Each policy carries its own attempt counter inside one loop, so the
//! termination bound is the sum of the three budgets plus one.

use crate::control::route::mutate_route_prefix;
use crate::control::transport::{ApiRequest, ControlTransport, RawResponse};
use crate::control::ControlError;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const LOGIN_PATH: &str = "/api/Login/login";

/// External function that may fix a rejected payload
#[async_trait::async_trait]
pub trait PayloadRepairer: Send + Sync {
    /// Return a revised payload, or `None` to give up
    async fn repair(&self, payload: &Value, error_response: &Value, error_code: i64) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Auth,
    Collision,
    Repair,
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::Auth => write!(f, "auth"),
            RetryPolicy::Collision => write!(f, "collision"),
            RetryPolicy::Repair => write!(f, "repair"),
        }
    }
}

/// One retry decision taken while delivering a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    /// The attempt that triggered the retry, starting at 1
    pub attempt: usize,
    pub policy: RetryPolicy,
    pub decision: String,
}

/// A successful response plus how we got there
#[derive(Debug, Clone)]
pub struct Delivered {
    pub response: RawResponse,
    /// The request as finally sent (renamed or repaired)
    pub request: ApiRequest,
    pub retries: Vec<RetryRecord>,
}

impl Delivered {
    /// The identifier the call finally succeeded with
    pub fn identifier(&self) -> Option<&str> {
        self.request.identifier()
    }
}

/// Whether the response says the chosen identifier is taken
pub fn is_collision(response: &RawResponse) -> bool {
    if response.is_success() {
        return false;
    }
    let message = response.err_message().to_lowercase();
    let english = message.contains("route")
        && ["exist", "occupied", "in use", "taken"]
            .iter()
            .any(|k| message.contains(k));
    let chinese = message.contains("路由") && message.contains("占用");
    english || chinese
}

/// One-time code the login endpoint accepts for a given day
pub fn validation_code_for(date: NaiveDate) -> String {
    date.format("%m%Y%d").to_string()
}

pub struct ResilientClient {
    transport: Arc<dyn ControlTransport>,
    phone_number: String,
    token: RwLock<Option<String>>,
    repairer: Option<Arc<dyn PayloadRepairer>>,
    collision_budget: usize,
    repair_budget: usize,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn ControlTransport>, phone_number: impl Into<String>) -> Self {
        Self {
            transport,
            phone_number: phone_number.into(),
            token: RwLock::new(None),
            repairer: None,
            collision_budget: 5,
            repair_budget: 3,
        }
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn PayloadRepairer>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_collision_budget(mut self, max_retries: usize) -> Self {
        self.collision_budget = max_retries;
        self
    }

    pub fn with_repair_budget(mut self, max_attempts: usize) -> Self {
        self.repair_budget = max_attempts;
        self
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            ..self
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Log in with today's validation code and store the session token
    pub async fn authenticate(&self) -> Result<String, ControlError> {
        let code = validation_code_for(chrono::Local::now().date_naive());
        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({
                "phone_number": self.phone_number,
                "validation_code": code,
            }),
        );

        let response = self.transport.send(&request).await?;
        if !response.is_success() {
            return Err(ControlError::Authentication(response.err_message()));
        }
        let token = response
            .payload()
            .get("session_key")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ControlError::Authentication("login response has no session_key".into()))?
            .to_string();

        *self.token.write().await = Some(token.clone());
        info!("Authenticated with control plane");
        Ok(token)
    }

    /// Deliver one logical call, applying the retry policies
    pub async fn send(&self, request: ApiRequest) -> Result<Delivered, ControlError> {
        let mut request = request;
        let mut retries: Vec<RetryRecord> = Vec::new();
        let mut attempt = 0usize;

        let mut reauthenticated = false;
        let mut collisions = 0usize;
        let mut repairs = 0usize;
        let mut first_collision: Option<ControlError> = None;
        let mut first_rejection: Option<ControlError> = None;

        loop {
            attempt += 1;
            request.token = self.token().await;
            let response = self.transport.send(&request).await?;

            if response.is_success() {
                return Ok(Delivered {
                    response,
                    request,
                    retries,
                });
            }

            if response.is_auth_failure() {
                if reauthenticated {
                    warn!(
                        "Attempt {} to {} still unauthorized after re-authenticating, giving up",
                        attempt, request.path
                    );
                    return Err(ControlError::Unauthorized(response.err_message()));
                }
                reauthenticated = true;
                self.authenticate().await?;
                Self::record(
                    &mut retries,
                    attempt,
                    RetryPolicy::Auth,
                    "re-authenticated, retrying once".to_string(),
                );
                continue;
            }

            if let (Some(field), true) = (request.collision_field, is_collision(&response)) {
                let identifier = request.identifier().unwrap_or_default().to_string();
                let first = first_collision
                    .get_or_insert_with(|| ControlError::Collision {
                        identifier: identifier.clone(),
                        message: response.err_message(),
                    })
                    .clone();

                if collisions >= self.collision_budget {
                    warn!(
                        "Attempt {}: identifier '{}' still colliding after {} renames",
                        attempt, identifier, collisions
                    );
                    return Err(first);
                }
                collisions += 1;

                let renamed = mutate_route_prefix(&identifier, &mut rand::thread_rng());
                if let Some(Value::Object(body)) = request.body.as_mut() {
                    body.insert(field.to_string(), Value::String(renamed.clone()));
                }
                Self::record(
                    &mut retries,
                    attempt,
                    RetryPolicy::Collision,
                    format!("'{}' in use, renamed to '{}'", identifier, renamed),
                );
                continue;
            }

            if request.repairable && response.is_client_error() {
                let original = first_rejection
                    .get_or_insert_with(|| response.rejection())
                    .clone();

                let repairer = match &self.repairer {
                    Some(r) if repairs < self.repair_budget => r.clone(),
                    _ => {
                        warn!(
                            "Attempt {}: rejected payload not repaired ({} of {} repairs used)",
                            attempt, repairs, self.repair_budget
                        );
                        return Err(original);
                    }
                };
                repairs += 1;

                let payload = request.body.clone().unwrap_or(Value::Null);
                let code = response.err_code().unwrap_or(response.status as i64);
                match repairer.repair(&payload, &response.body, code).await {
                    Some(revised) => {
                        request.body = Some(revised);
                        Self::record(
                            &mut retries,
                            attempt,
                            RetryPolicy::Repair,
                            format!("payload revised (repair {} of {})", repairs, self.repair_budget),
                        );
                        continue;
                    }
                    None => {
                        warn!("Attempt {}: repairer returned nothing, giving up", attempt);
                        return Err(original);
                    }
                }
            }

            return Err(response.rejection());
        }
    }

    fn record(retries: &mut Vec<RetryRecord>, attempt: usize, policy: RetryPolicy, decision: String) {
        info!("Attempt {} [{} policy]: {}", attempt, policy, decision);
        retries.push(RetryRecord {
            attempt,
            policy,
            decision,
        });
    }
}
