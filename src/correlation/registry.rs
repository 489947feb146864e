//! Per-run registry of waiting tasks with restart rehydration.
//!
//! # Invariants
//!
//! - Mutations (`add`, `remove`) and reads (`lookup`, `list_all`) of one
//!   registry are serialized by a single async mutex
//! - The live list is either unloaded (`None`) or a subset of the persisted
//!   records: `|live| <= |persisted|`
//! - Readers get a cloned snapshot, never a view into the guarded list
//! - A rehydration never fabricates a task: it only keeps units the host
//!   reports as paused whose id is persisted
//!
//! # Rehydration
//!
//! ```text
//! live == None ──► host.active_runs() contains run?
//!                    │ no  ──► "execution missing", live = []
//!                    │ yes ──► host.suspended_units(run)
//!                    │           filter tag == T::TAG && id persisted
//!                    │           found < persisted ──► "tasks lost" warning
//!                    ▼
//!                  live = found
//! timeout ──► fail closed: behave as empty, leave live unloaded
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{CorrelationError, Result};
use crate::host::{ActiveExecutionLookup, SuspendedUnit, TaskTag};
use crate::persistence::{JobRunStore, TaskRecord, update_run};
use crate::types::{JobRunId, TaskId};

/// A task type that can live in a [`TaskRegistry`].
pub trait Correlated: Send + Sync + 'static {
    /// Tag under which records of this type are persisted and units matched.
    const TAG: TaskTag;

    fn id(&self) -> TaskId;

    /// Persisted projection of the task.
    fn record(&self) -> TaskRecord;

    /// Picks a task of this type out of a host unit.
    fn from_unit(unit: &SuspendedUnit) -> Option<Arc<Self>>;
}

struct RegistryState<T> {
    persisted: Vec<TaskRecord>,
    /// `None` until loaded; distinct from an empty list.
    live: Option<Vec<Arc<T>>>,
}

/// Outcome of a rehydration attempt.
enum Rehydrated<T> {
    Found(Vec<Arc<T>>),
    ExecutionMissing,
    TimedOut,
}

/// Waiting tasks of one type for one job run.
pub struct TaskRegistry<T: Correlated> {
    run: JobRunId,
    store: Arc<dyn JobRunStore>,
    host: Arc<dyn ActiveExecutionLookup>,
    rehydrate_timeout: Duration,
    state: Mutex<RegistryState<T>>,
}

impl<T: Correlated> std::fmt::Debug for TaskRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("run", &self.run)
            .field("tag", &T::TAG)
            .finish_non_exhaustive()
    }
}

impl<T: Correlated> TaskRegistry<T> {
    /// Opens the registry of `run`, reading its persisted records.
    ///
    /// A run without persisted records starts with an empty, loaded live
    /// list; otherwise the live list stays unloaded until first access. A run
    /// whose metadata is gone (deleted run) opens empty.
    pub fn open(
        run: JobRunId,
        store: Arc<dyn JobRunStore>,
        host: Arc<dyn ActiveExecutionLookup>,
        rehydrate_timeout: Duration,
    ) -> Result<Self> {
        let persisted = store
            .load(&run)?
            .map(|m| m.task_records(T::TAG).to_vec())
            .unwrap_or_default();

        let live = if persisted.is_empty() {
            Some(Vec::new())
        } else {
            None
        };

        debug!(run = %run, tag = %T::TAG, persisted = persisted.len(), "registry opened");

        Ok(TaskRegistry {
            run,
            store,
            host,
            rehydrate_timeout,
            state: Mutex::new(RegistryState { persisted, live }),
        })
    }

    pub fn run(&self) -> &JobRunId {
        &self.run
    }

    /// Registers a task and persists the run's records.
    ///
    /// Adding an id that is already present is a no-op.
    #[instrument(skip_all, fields(run = %self.run, tag = %T::TAG, task = %task.id()))]
    pub async fn add(&self, task: Arc<T>) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_live(&mut state).await;

        let id = task.id();
        if !state.persisted.iter().any(|r| r.id == id) {
            let record = task.record();
            let persisted = self.persist(true, move |records| {
                if !records.iter().any(|r| r.id == record.id) {
                    records.push(record);
                }
            })?;
            state.persisted = persisted.unwrap_or_default();
        }

        if let Some(live) = state.live.as_mut()
            && !live.iter().any(|t| t.id() == id)
        {
            live.push(task);
        }

        debug!(count = state.persisted.len(), "task registered");
        Ok(())
    }

    /// Unregisters a task. Returns whether anything was removed; removing an
    /// unknown or already removed id is a no-op.
    #[instrument(skip_all, fields(run = %self.run, tag = %T::TAG, task = %id))]
    pub async fn remove(&self, id: TaskId) -> Result<bool> {
        let mut state = self.state.lock().await;

        let removed_live = match state.live.as_mut() {
            Some(live) => {
                let before = live.len();
                live.retain(|t| t.id() != id);
                live.len() != before
            }
            None => false,
        };

        let removed_persisted = state.persisted.iter().any(|r| r.id == id);
        if removed_persisted {
            // A deleted run has nothing left to update.
            let persisted = self.persist(false, |records| records.retain(|r| r.id != id))?;
            state.persisted = persisted.unwrap_or_default();
        }

        if removed_live || removed_persisted {
            debug!(count = state.persisted.len(), "task unregistered");
        }
        Ok(removed_live || removed_persisted)
    }

    /// Finds a live task by id, rehydrating first if needed.
    pub async fn lookup(&self, id: TaskId) -> Option<Arc<T>> {
        let mut state = self.state.lock().await;
        self.ensure_live(&mut state)
            .await
            .into_iter()
            .find(|t| t.id() == id)
    }

    /// Snapshot of all live tasks, rehydrating first if needed.
    pub async fn list_all(&self) -> Vec<Arc<T>> {
        let mut state = self.state.lock().await;
        self.ensure_live(&mut state).await
    }

    /// Ids of the persisted records.
    pub async fn persisted_ids(&self) -> Vec<TaskId> {
        self.state
            .lock()
            .await
            .persisted
            .iter()
            .map(|r| r.id)
            .collect()
    }

    /// Persisted records, in registration order.
    pub async fn persisted_records(&self) -> Vec<TaskRecord> {
        self.state.lock().await.persisted.clone()
    }

    /// Whether the live list has been loaded.
    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.live.is_some()
    }

    /// Edits this tag's records inside one store update and returns what
    /// was written, or `None` if the run has no metadata and `create` is
    /// unset.
    fn persist(
        &self,
        create: bool,
        edit: impl FnOnce(&mut Vec<TaskRecord>),
    ) -> Result<Option<Vec<TaskRecord>>> {
        let written = update_run(self.store.as_ref(), &self.run, create, |metadata| {
            let mut records = metadata.task_records(T::TAG).to_vec();
            edit(&mut records);
            metadata.set_task_records(T::TAG, records.clone());
            records
        })?;
        Ok(written)
    }

    /// Returns a snapshot of the live list, loading it first if unloaded.
    async fn ensure_live(&self, state: &mut RegistryState<T>) -> Vec<Arc<T>> {
        if let Some(live) = &state.live {
            return live.clone();
        }

        match self.rehydrate(&state.persisted).await {
            Rehydrated::Found(found) => {
                state.live = Some(found.clone());
                found
            }
            Rehydrated::ExecutionMissing => {
                state.live = Some(Vec::new());
                Vec::new()
            }
            Rehydrated::TimedOut => Vec::new(),
        }
    }

    #[instrument(skip_all, fields(run = %self.run, tag = %T::TAG))]
    async fn rehydrate(&self, persisted: &[TaskRecord]) -> Rehydrated<T> {
        let search = async {
            let active = self.host.active_runs().await;
            if !active.contains(&self.run) {
                return None;
            }
            self.host.suspended_units(&self.run).await
        };

        let units = match tokio::time::timeout(self.rehydrate_timeout, search).await {
            Ok(Some(units)) => units,
            Ok(None) => {
                warn!(persisted = persisted.len(), "execution missing, no tasks rehydrated");
                return Rehydrated::ExecutionMissing;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.rehydrate_timeout.as_secs(),
                    "rehydration timed out"
                );
                return Rehydrated::TimedOut;
            }
        };

        let found: Vec<Arc<T>> = units
            .iter()
            .filter(|unit| unit.tag() == T::TAG)
            .filter(|unit| persisted.iter().any(|r| r.id == unit.id()))
            .filter_map(T::from_unit)
            .collect();

        if found.len() < persisted.len() {
            let lost = CorrelationError::RehydrationLost {
                run: self.run.clone(),
                expected: persisted.len(),
                found: found.len(),
            };
            warn!(error = %lost, "tasks lost on restart");
        } else {
            info!(count = found.len(), "tasks rehydrated");
        }

        Rehydrated::Found(found)
    }
}
