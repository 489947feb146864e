//! In-process execution host.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{ActiveExecutionLookup, SuspendedUnit};
use crate::types::{JobRunId, TaskId};

/// Execution context of one active job run.
#[derive(Debug, Default)]
struct RunContext {
    paused: Vec<SuspendedUnit>,
}

/// Host that keeps active runs and their paused units in memory.
///
/// A restarted process builds a fresh `LocalHost` and re-registers the units
/// it restores; the correlation registries then rehydrate from it.
#[derive(Debug, Default)]
pub struct LocalHost {
    runs: Mutex<HashMap<JobRunId, RunContext>>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an execution context for `run`. No-op if already active.
    pub fn begin_run(&self, run: &JobRunId) {
        self.runs.lock().entry(run.clone()).or_default();
    }

    /// Closes the execution context of `run` and returns whatever was still
    /// paused in it.
    pub fn end_run(&self, run: &JobRunId) -> Vec<SuspendedUnit> {
        self.runs
            .lock()
            .remove(run)
            .map(|ctx| ctx.paused)
            .unwrap_or_default()
    }

    pub fn is_active(&self, run: &JobRunId) -> bool {
        self.runs.lock().contains_key(run)
    }

    pub fn is_paused(&self, run: &JobRunId, id: TaskId) -> bool {
        self.runs
            .lock()
            .get(run)
            .is_some_and(|ctx| ctx.paused.iter().any(|u| u.id() == id))
    }

    /// Number of paused units in `run`. A run whose count is zero is free to
    /// complete.
    pub fn paused_count(&self, run: &JobRunId) -> usize {
        self.runs.lock().get(run).map_or(0, |ctx| ctx.paused.len())
    }

    /// Aborts every paused unit of `run` (user cancel, run deleted).
    pub async fn abort_run(&self, run: &JobRunId, reason: &str) {
        let units: Vec<SuspendedUnit> = self
            .runs
            .lock()
            .get(run)
            .map(|ctx| ctx.paused.clone())
            .unwrap_or_default();

        info!(run = %run, count = units.len(), reason, "aborting paused units");
        for unit in units {
            unit.abort(reason).await;
        }
    }
}

#[async_trait]
impl ActiveExecutionLookup for LocalHost {
    async fn active_runs(&self) -> Vec<JobRunId> {
        self.runs.lock().keys().cloned().collect()
    }

    async fn suspended_units(&self, run: &JobRunId) -> Option<Vec<SuspendedUnit>> {
        self.runs.lock().get(run).map(|ctx| ctx.paused.clone())
    }

    fn mark_paused(&self, run: &JobRunId, unit: SuspendedUnit) {
        let mut runs = self.runs.lock();
        let ctx = runs.entry(run.clone()).or_default();
        if ctx.paused.iter().any(|u| u.id() == unit.id()) {
            return;
        }
        debug!(run = %run, task = %unit.id(), tag = %unit.tag(), "unit paused");
        ctx.paused.push(unit);
    }

    fn release(&self, run: &JobRunId, id: TaskId) {
        if let Some(ctx) = self.runs.lock().get_mut(run) {
            ctx.paused.retain(|u| u.id() != id);
        }
    }
}
