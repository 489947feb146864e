//! Core domain types for the execution relay.
//!
//! This module contains the identifiers and remote pipeline vocabulary shared
//! by the ingress, correlation, and polling layers.

pub mod ids;
pub mod pipeline;

// Re-export commonly used types at the module level
pub use ids::{ExecutionRef, JobRunId, TaskId};
pub use pipeline::{
    ActionFilter, Execution, ExecutionStatus, StepAction, StepInterest, StepState, StepStatus,
    UnknownAction,
};
