//! Persistence layer for run-scoped metadata.
//!
//! Each job run owns one small JSON document ([`RunMetadata`]) holding the
//! remote executions attached to it, the persisted ids of its waiting tasks
//! and its poller parameters.
//!
//! # Crash Safety
//!
//! - Writes go to a temp file that is fsynced, renamed over the old file, and
//!   followed by a directory fsync
//! - A crash leaves either the old or the new document, never a torn one
//! - A missing document reads as "no metadata" so deleted runs are tolerated
//! - Read-modify-write cycles of one run are serialized by the store, and
//!   each save uses its own temp file

pub mod fsync;
pub mod run_store;

pub use fsync::{fsync_dir, fsync_file};
pub use run_store::{
    FileJobRunStore, JobRunStore, MemoryJobRunStore, RunMetadata, SCHEMA_VERSION, StoreError,
    TaskRecord, apply_update, update_run,
};
