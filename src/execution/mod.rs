//! Pipeline execution engine

pub mod collaborators;
pub mod engine;
pub mod executor;
pub mod scheduler;
pub mod steps;

pub use collaborators::{CommandCollaborators, ListingCheck, PublishCollaborators};
pub use engine::{EventHandler, ExecutionEvent, PipelineEngine, RunSummary};
pub use executor::{StepError, StepFailure, StepOutcome, StepRunner};
pub use scheduler::{pending_in_order, plan_resume, ResumePlan};
pub use steps::{FactorySteps, TemplateTester};
