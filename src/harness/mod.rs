//! Capability test harness
//!
//! Provisions a short-lived instance of a published template, waits for it
//! to accept an event-stream connection, enumerates its capabilities and
//! invokes each one over a [`CorrelationChannel`].

pub mod channel;
pub mod classify;
pub mod envelope;
pub mod report;
pub mod sse;
pub mod synth;
pub mod tester;

pub use channel::{CorrelationChannel, Reply};
pub use classify::{classify, CapabilityStatus};
pub use envelope::{CapabilityDescriptor, RpcMessage, RpcRequest};
pub use report::{CapabilityResult, HarnessPhase, HarnessReport, PhaseRecord};
pub use sse::{EnvelopePoster, FrameStream, PostAck, SseFrame};
pub use synth::{fallback_arguments, synthesize_arguments, ArgumentSynthesizer};
pub use tester::{CapabilityTestHarness, ChannelConnector, SseConnector};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to connect event stream: {0}")]
    Connect(String),

    #[error("session not established: {0}")]
    SessionNotEstablished(String),

    #[error("failed to submit envelope: {0}")]
    Post(String),

    #[error("event stream listener stopped")]
    ListenerStopped,

    #[error("channel is closed")]
    Closed,
}

/// A fatal failure before capability invocation, tagged with its phase
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{phase} failed: {message}")]
pub struct HarnessError {
    pub phase: HarnessPhase,
    pub message: String,
}

impl HarnessError {
    pub fn new(phase: HarnessPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}
