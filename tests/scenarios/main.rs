//! Scenario-based tests for the publish pipeline

mod helpers;

mod failure_handling;
mod gating;
mod resume;
