//! Correlation of notifications with waiting tasks.
//!
//! Every job run owns one [`TaskRegistry`] per task tag. A registry keeps two
//! views of the run's waiting tasks:
//!
//! - the **persisted** records (ids and interest sets) stored in the run's
//!   metadata, which survive a process restart
//! - the **live** task objects, which carry the resume capability and are
//!   lost on restart
//!
//! After a restart the live view is unloaded and is rebuilt on first access
//! by asking the host which units of the run are still paused
//! (rehydration). The [`CorrelationIndex`] owns the registries of every run
//! the process knows about, and the [`CorrelationEngine`] routes decoded
//! notifications through it.

pub mod engine;
pub mod index;
pub mod registry;


use thiserror::Error;

use crate::persistence::StoreError;
use crate::types::{ExecutionRef, JobRunId};
use crate::webhooks::IngressError;

pub use engine::CorrelationEngine;
pub use index::{CorrelationIndex, RunRegistries};
pub use registry::{Correlated, TaskRegistry};

/// Errors of the correlation layer.
///
/// None of these fail a webhook request: subscribers log and swallow them.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// No registry or task matched the notification.
    #[error("no waiting task for {kind} on {execution}")]
    CorrelationNotFound {
        kind: crate::webhooks::EventKind,
        execution: ExecutionRef,
    },

    /// Fewer live tasks were recovered than were persisted.
    #[error("rehydration of {run} recovered only {found} of {expected} tasks")]
    RehydrationLost {
        run: JobRunId,
        expected: usize,
        found: usize,
    },

    /// No configured project matches the notification's organization scope.
    #[error("no project configured for organization scope {scope:?}")]
    ConfigurationMissing { scope: Option<String> },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payload error: {0}")]
    Ingress(#[from] IngressError),
}

/// Result type for correlation operations.
pub type Result<T> = std::result::Result<T, CorrelationError>;
