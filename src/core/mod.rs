//! Core domain models
//!
//! Projects, their fixed step set, the records steps produce, and the
//! gates that decide whether a step may run.

pub mod config;
pub mod context;
pub mod gate;
pub mod project;
pub mod report;
pub mod state;
pub mod step;

pub use context::*;
pub use gate::{GateSnapshot, GateViolation};
pub use project::*;
pub use report::*;
pub use state::*;
pub use step::*;
