//! mcp-factory - publish pipeline for generated MCP servers, with a
//! streamed capability test harness

pub mod agent;
pub mod cli;
pub mod control;
pub mod core;
pub mod execution;
pub mod harness;
pub mod persistence;

// Re-export commonly used types
pub use agent::{AgentError, AgentExecutor, AgentResponse, HelperAgentClient};
pub use control::{ControlError, ControlPlane, ResilientClient};
pub use core::{Project, ProjectStatus, StepName, StepStatus};
pub use execution::{ExecutionEvent, FactorySteps, PipelineEngine, RunSummary, StepFailure};
pub use harness::{CapabilityTestHarness, CorrelationChannel, HarnessReport};
pub use persistence::{InMemoryStore, PipelineStore};
