//! Run-scoped metadata and the job-run store.
//!
//! The correlation engine persists very little per job run: the remote
//! executions attached to it, the ids (and interest sets) of its waiting
//! tasks, and the parameters of its pollers. The live task objects, and with
//! them the ability to resume anything, are never written to disk.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/<escaped run id>/
//!   run.json        # RunMetadata, replaced atomically on every save
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::host::TaskTag;
use crate::poller::PollSpec;
use crate::types::{ExecutionRef, JobRunId, StepInterest, TaskId};

/// Current schema version for run metadata.
pub const SCHEMA_VERSION: u32 = 1;

/// Name of the metadata file inside a run directory.
pub const RUN_FILE: &str = "run.json";

/// Errors that can occur while loading or saving run metadata.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Persisted projection of one waiting task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Step interest; absent for tasks that wait on the whole execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest: Option<StepInterest>,
}

impl TaskRecord {
    pub fn new(id: TaskId) -> Self {
        TaskRecord { id, interest: None }
    }

    pub fn with_interest(id: TaskId, interest: StepInterest) -> Self {
        TaskRecord {
            id,
            interest: Some(interest),
        }
    }
}

/// Metadata attached to a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this metadata was last saved.
    pub updated_at: DateTime<Utc>,

    /// Remote executions attached to the run, in attachment order.
    #[serde(default)]
    pub executions: Vec<ExecutionRef>,

    /// Persisted waiting-task ids, per registry tag.
    #[serde(default)]
    pub tasks: BTreeMap<TaskTag, Vec<TaskRecord>>,

    /// Parameters of the run's active pollers.
    #[serde(default)]
    pub polls: BTreeMap<TaskId, PollSpec>,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetadata {
    pub fn new() -> Self {
        RunMetadata {
            schema_version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            executions: Vec::new(),
            tasks: BTreeMap::new(),
            polls: BTreeMap::new(),
        }
    }

    /// Attaches an execution. Returns false if it was already attached.
    pub fn attach_execution(&mut self, execution: ExecutionRef) -> bool {
        if self.executions.contains(&execution) {
            return false;
        }
        self.executions.push(execution);
        true
    }

    pub fn has_execution(&self, execution: &ExecutionRef) -> bool {
        self.executions.contains(execution)
    }

    pub fn task_records(&self, tag: TaskTag) -> &[TaskRecord] {
        self.tasks.get(&tag).map(Vec::as_slice).unwrap_or_default()
    }

    /// Replaces the records of `tag`; an empty list removes the entry.
    pub fn set_task_records(&mut self, tag: TaskTag, records: Vec<TaskRecord>) {
        if records.is_empty() {
            self.tasks.remove(&tag);
        } else {
            self.tasks.insert(tag, records);
        }
    }
}

/// Persists run-scoped metadata.
///
/// Several writers share one document per run (each registry tag, pollers,
/// attached executions), so every read-modify-write goes through
/// [`JobRunStore::update`], which implementations serialize per run.
pub trait JobRunStore: Send + Sync {
    /// Loads the metadata of `run`. `Ok(None)` if the run has none (never
    /// saved, or deleted).
    fn load(&self, run: &JobRunId) -> Result<Option<RunMetadata>>;

    /// Saves and flushes the metadata of `run`.
    fn save(&self, run: &JobRunId, metadata: &RunMetadata) -> Result<()>;

    /// Deletes everything stored for `run`. Deleting an unknown run is a no-op.
    fn delete(&self, run: &JobRunId) -> Result<()>;

    /// Loads, modifies and saves `run` with no other update of the same run
    /// in between. Returns false if the run had no metadata and `create` was
    /// unset; `f` is not called then.
    fn update(
        &self,
        run: &JobRunId,
        create: bool,
        f: &mut dyn FnMut(&mut RunMetadata),
    ) -> Result<bool>;
}

/// Applies `f` to the current document of a run, or to a fresh one when
/// `create` is set. Returns the document to save, or `None` to skip.
///
/// Store implementations call this while holding their per-run lock.
pub fn apply_update(
    current: Option<RunMetadata>,
    create: bool,
    f: &mut dyn FnMut(&mut RunMetadata),
) -> Option<RunMetadata> {
    let mut metadata = match current {
        Some(metadata) => metadata,
        None if create => RunMetadata::new(),
        None => return None,
    };
    f(&mut metadata);
    metadata.updated_at = Utc::now();
    Some(metadata)
}

/// Loads, modifies and saves the metadata of `run` through
/// [`JobRunStore::update`].
///
/// When the run has no metadata, `create` decides between starting from a
/// fresh [`RunMetadata`] and skipping the update (`Ok(None)`).
pub fn update_run<R>(
    store: &dyn JobRunStore,
    run: &JobRunId,
    create: bool,
    f: impl FnOnce(&mut RunMetadata) -> R,
) -> Result<Option<R>> {
    let mut f = Some(f);
    let mut result = None;
    store.update(run, create, &mut |metadata| {
        if let Some(f) = f.take() {
            result = Some(f(metadata));
        }
    })?;
    Ok(result)
}

// ============================================================================
// File store
// ============================================================================

/// Stores each run as `<root>/<escaped run id>/run.json`.
///
/// Updates and deletes of one run are serialized by a per-run lock shared
/// between clones of the store.
#[derive(Debug, Clone)]
pub struct FileJobRunStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<JobRunId, Arc<Mutex<()>>>>>,
}

impl FileJobRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileJobRunStore {
            root: root.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn run_lock(&self, run: &JobRunId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(run.clone()).or_default())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run: &JobRunId) -> PathBuf {
        self.root.join(escape_component(run.as_str()))
    }

    pub fn run_file(&self, run: &JobRunId) -> PathBuf {
        self.run_dir(run).join(RUN_FILE)
    }
}

impl JobRunStore for FileJobRunStore {
    fn load(&self, run: &JobRunId) -> Result<Option<RunMetadata>> {
        let bytes = match std::fs::read(self.run_file(run)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let metadata: RunMetadata = serde_json::from_slice(&bytes)?;
        if metadata.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: metadata.schema_version,
            });
        }
        Ok(Some(metadata))
    }

    fn save(&self, run: &JobRunId, metadata: &RunMetadata) -> Result<()> {
        save_atomic(&self.run_file(run), metadata)
    }

    fn delete(&self, run: &JobRunId) -> Result<()> {
        let lock = self.run_lock(run);
        let _guard = lock.lock();

        match std::fs::remove_dir_all(self.run_dir(run)) {
            Ok(()) => {
                fsync_dir(&self.root)?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(
        &self,
        run: &JobRunId,
        create: bool,
        f: &mut dyn FnMut(&mut RunMetadata),
    ) -> Result<bool> {
        let lock = self.run_lock(run);
        let _guard = lock.lock();

        match apply_update(self.load(run)?, create, f) {
            Some(metadata) => {
                self.save(run, &metadata)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Writes metadata atomically: uniquely named temp file, fsync, rename,
/// directory fsync.
fn save_atomic(path: &Path, metadata: &RunMetadata) -> Result<()> {
    use std::io::Write;

    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "run file has no parent"))?;
    std::fs::create_dir_all(dir)?;

    let bytes = serde_json::to_vec_pretty(metadata)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".run-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&bytes)?;
    fsync_file(tmp.as_file())?;
    tmp.persist(path).map_err(|e| e.error)?;

    fsync_dir(dir)?;
    Ok(())
}

/// Escapes a run id into a single safe path component.
///
/// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so `folder/job#3` maps to
/// `folder%2Fjob%233` and `..` can never escape the state directory.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

// ============================================================================
// Memory store
// ============================================================================

/// Keeps run metadata in memory. Counts saves so tests can assert that a
/// mutation was persisted.
#[derive(Debug, Default)]
pub struct MemoryJobRunStore {
    runs: Mutex<HashMap<JobRunId, RunMetadata>>,
    saves: AtomicUsize,
}

impl MemoryJobRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl JobRunStore for MemoryJobRunStore {
    fn load(&self, run: &JobRunId) -> Result<Option<RunMetadata>> {
        Ok(self.runs.lock().get(run).cloned())
    }

    fn save(&self, run: &JobRunId, metadata: &RunMetadata) -> Result<()> {
        self.runs.lock().insert(run.clone(), metadata.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, run: &JobRunId) -> Result<()> {
        self.runs.lock().remove(run);
        Ok(())
    }

    fn update(
        &self,
        run: &JobRunId,
        create: bool,
        f: &mut dyn FnMut(&mut RunMetadata),
    ) -> Result<bool> {
        let mut runs = self.runs.lock();
        match apply_update(runs.get(run).cloned(), create, f) {
            Some(metadata) => {
                runs.insert(run.clone(), metadata);
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
