//! Waiting tasks: the suspended units of work notifications resume.
//!
//! - [`StepWaitTask`] waits for step-level notifications on one execution
//! - [`ExecutionEndTask`] waits for the execution-ended notification and
//!   sweeps the run's remaining step tasks

pub mod end;
pub mod state;
pub mod step;

use thiserror::Error;

use crate::correlation::CorrelationError;

pub use end::{ExecutionEndTask, SweepReport};
pub use state::{FinishReason, StateCell, TaskState};
pub use step::StepWaitTask;

/// Errors raised while a task transitions.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("registry error: {0}")]
    Registry(#[from] CorrelationError),
}

/// Result type for task transitions.
pub type Result<T> = std::result::Result<T, TaskError>;
