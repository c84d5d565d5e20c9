//! Workflow Definition Module
//!
//! Data structures for workflows and the steps they group.
//!
//! # Structure
//!
//! - [`model`]: identifiers, steps, workflows and their lifecycle

pub mod model;

pub use model::{
    Headers, SharedStep, SharedWorkflow, Step, StepId, StepRequest, StepResult, StepState,
    Workflow, WorkflowId,
};
