//! The execution host: where suspended units of work live.
//!
//! The host runs job runs and keeps, per active run, the units of work that
//! are currently paused. The correlation engine never scans host internals
//! directly; it goes through the [`ActiveExecutionLookup`] seam, which is also
//! how rehydration rebuilds the live task lists after a restart.
//!
//! Units are tagged ([`TaskTag`]) so a registry can pick out its own kind of
//! task without any runtime type inspection.

pub mod local;
pub mod suspension;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::poller::PollTask;
use crate::tasks::{ExecutionEndTask, StepWaitTask};
use crate::types::{JobRunId, TaskId};

pub use local::LocalHost;
pub use suspension::{Completion, FailureCause, Outcome, Resumed, Suspension, suspend};

/// Capability tag of a suspended unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskTag {
    /// Waits for a step-level notification.
    StepWait,
    /// Waits for the terminal execution-ended notification.
    ExecutionEnd,
    /// Polls the remote execution status.
    Poll,
}

impl TaskTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTag::StepWait => "step-wait",
            TaskTag::ExecutionEnd => "execution-end",
            TaskTag::Poll => "poll",
        }
    }
}

impl std::fmt::Display for TaskTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paused unit of work as the host sees it.
#[derive(Debug, Clone)]
pub enum SuspendedUnit {
    StepWait(Arc<StepWaitTask>),
    ExecutionEnd(Arc<ExecutionEndTask>),
    Poll(Arc<PollTask>),
}

impl SuspendedUnit {
    pub fn id(&self) -> TaskId {
        match self {
            SuspendedUnit::StepWait(task) => task.id(),
            SuspendedUnit::ExecutionEnd(task) => task.id(),
            SuspendedUnit::Poll(task) => task.id(),
        }
    }

    pub fn tag(&self) -> TaskTag {
        match self {
            SuspendedUnit::StepWait(_) => TaskTag::StepWait,
            SuspendedUnit::ExecutionEnd(_) => TaskTag::ExecutionEnd,
            SuspendedUnit::Poll(_) => TaskTag::Poll,
        }
    }

    /// Stops the unit because the host cancelled it.
    pub async fn abort(&self, reason: &str) {
        match self {
            SuspendedUnit::StepWait(task) => task.abort(reason).await,
            SuspendedUnit::ExecutionEnd(task) => task.abort(reason).await,
            SuspendedUnit::Poll(task) => task.stop(),
        }
    }
}

/// Read access to the host's active executions, plus the paused markers.
#[async_trait]
pub trait ActiveExecutionLookup: Send + Sync {
    /// Job runs that currently have a live execution context.
    async fn active_runs(&self) -> Vec<JobRunId>;

    /// Currently paused units of `run`, or `None` if `run` has no live
    /// execution context.
    async fn suspended_units(&self, run: &JobRunId) -> Option<Vec<SuspendedUnit>>;

    /// Records that `unit` is paused and blocks `run` from progressing.
    fn mark_paused(&self, run: &JobRunId, unit: SuspendedUnit);

    /// Clears the paused marker of task `id`. Unknown ids are ignored.
    fn release(&self, run: &JobRunId, id: TaskId);
}
