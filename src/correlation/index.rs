//! Arena of per-run registries, indexed by job-run id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::registry::TaskRegistry;
use super::Result;
use crate::host::ActiveExecutionLookup;
use crate::persistence::{JobRunStore, update_run};
use crate::tasks::{ExecutionEndTask, StepWaitTask};
use crate::types::{ExecutionRef, JobRunId};

/// The registries of one job run.
#[derive(Debug)]
pub struct RunRegistries {
    pub steps: Arc<TaskRegistry<StepWaitTask>>,
    pub ends: Arc<TaskRegistry<ExecutionEndTask>>,
}

/// Owns the registries of every job run the process knows about.
///
/// Registries are opened lazily. A run discovered after a restart gets
/// registries whose live lists are unloaded, so its first lookup rehydrates.
pub struct CorrelationIndex {
    store: Arc<dyn JobRunStore>,
    host: Arc<dyn ActiveExecutionLookup>,
    rehydrate_timeout: Duration,
    runs: Mutex<HashMap<JobRunId, Arc<RunRegistries>>>,
}

impl std::fmt::Debug for CorrelationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationIndex")
            .field("runs", &self.runs.lock().len())
            .field("rehydrate_timeout", &self.rehydrate_timeout)
            .finish_non_exhaustive()
    }
}

impl CorrelationIndex {
    pub fn new(
        store: Arc<dyn JobRunStore>,
        host: Arc<dyn ActiveExecutionLookup>,
        rehydrate_timeout: Duration,
    ) -> Self {
        CorrelationIndex {
            store,
            host,
            rehydrate_timeout,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobRunStore> {
        &self.store
    }

    pub fn host(&self) -> &Arc<dyn ActiveExecutionLookup> {
        &self.host
    }

    /// Returns the registries of `run`, opening them on first use.
    ///
    /// Opening happens under the map lock, so every caller of one run shares
    /// the same pair of registries.
    pub fn registries(&self, run: &JobRunId) -> Result<Arc<RunRegistries>> {
        let mut runs = self.runs.lock();
        if let Some(existing) = runs.get(run) {
            return Ok(Arc::clone(existing));
        }

        let opened = Arc::new(RunRegistries {
            steps: Arc::new(TaskRegistry::open(
                run.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.host),
                self.rehydrate_timeout,
            )?),
            ends: Arc::new(TaskRegistry::open(
                run.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.host),
                self.rehydrate_timeout,
            )?),
        });
        runs.insert(run.clone(), Arc::clone(&opened));
        Ok(opened)
    }

    /// Attaches a remote execution to `run`'s metadata. Returns false if it
    /// was already attached.
    pub fn attach_execution(&self, run: &JobRunId, execution: ExecutionRef) -> Result<bool> {
        let attached = update_run(self.store.as_ref(), run, true, |metadata| {
            metadata.attach_execution(execution.clone())
        })?
        .unwrap_or(false);

        if attached {
            info!(run = %run, execution = %execution, "execution attached");
        }
        Ok(attached)
    }

    /// Active job runs that have `execution` attached.
    ///
    /// The host scan is bounded by the rehydration timeout and fails closed.
    pub async fn runs_for_execution(&self, execution: &ExecutionRef) -> Vec<JobRunId> {
        let active =
            match tokio::time::timeout(self.rehydrate_timeout, self.host.active_runs()).await {
                Ok(active) => active,
                Err(_) => {
                    warn!(execution = %execution, "active run scan timed out");
                    return Vec::new();
                }
            };

        let mut matching = Vec::new();
        for run in active {
            match self.store.load(&run) {
                Ok(Some(metadata)) if metadata.has_execution(execution) => matching.push(run),
                Ok(_) => {}
                Err(e) => warn!(run = %run, error = %e, "cannot read run metadata"),
            }
        }
        matching.sort();

        debug!(execution = %execution, runs = matching.len(), "runs for execution");
        matching
    }

    /// Aborts every registered task of `run` and forgets its registries.
    pub async fn abort_run(&self, run: &JobRunId, reason: &str) -> Result<()> {
        let registries = self.registries(run)?;

        for task in registries.steps.list_all().await {
            task.abort(reason).await;
        }
        for task in registries.ends.list_all().await {
            task.abort(reason).await;
        }

        self.forget(run);
        Ok(())
    }

    /// Drops the in-memory registries of `run`. Persisted state is untouched.
    pub fn forget(&self, run: &JobRunId) {
        if self.runs.lock().remove(run).is_some() {
            debug!(run = %run, "registries dropped");
        }
    }

    pub fn known_runs(&self) -> Vec<JobRunId> {
        let mut runs: Vec<JobRunId> = self.runs.lock().keys().cloned().collect();
        runs.sort();
        runs
    }
}
