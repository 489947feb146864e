//! fsync helpers for the job-run store.
//!
//! A rename only survives power loss once the parent directory entry has been
//! synced as well, so every atomic write ends with [`fsync_dir`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flushes a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flushes a directory's entries to disk.
///
/// Only meaningful for directories; callers pass the parent of a file they
/// just created, renamed or removed.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir_path)?.sync_all()
}
