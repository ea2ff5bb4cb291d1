//! Control-plane client
//!
//! `transport` sends raw requests, `resilient` wraps them in bounded retry
//! policies, and `api` exposes the typed endpoints the pipeline and the
//! capability harness use.

pub mod api;
pub mod resilient;
pub mod route;
pub mod template;
pub mod transport;

pub use api::{ConnectionDescriptor, ControlPlane, PublishState, TemplateUpsert};
pub use resilient::{Delivered, PayloadRepairer, ResilientClient, RetryPolicy, RetryRecord};
pub use route::{mutate_route_prefix, normalize_route_prefix};
pub use template::{multi_lang, template_payload, PackageKind};
pub use transport::{ApiRequest, ControlTransport, HttpTransport, RawResponse};

use thiserror::Error;

/// Errors surfaced by the control-plane client once local budgets are spent
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("still unauthorized after re-authenticating: {0}")]
    Unauthorized(String),

    #[error("identifier '{identifier}' already in use: {message}")]
    Collision { identifier: String, message: String },

    #[error("request rejected (http {status}, code {code}): {message}")]
    Rejected {
        status: u16,
        code: i64,
        message: String,
    },

    #[error("unexpected response body: {0}")]
    UnexpectedBody(String),
}
