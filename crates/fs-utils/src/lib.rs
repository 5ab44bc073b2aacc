//! Filesystem utilities used by the storage core.
//!
//! Currently just the advisory exclusive lock a `Conglomerate` takes on its
//! root directory at open time: only one process may have
//! a given conglomerate open for writing at a time.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{path}: another process already holds this lock")]
    AlreadyLocked { path: PathBuf },
    #[error("{path}: {source}")]
    Io { path: PathBuf, #[source] source: io::Error },
}

/// An advisory exclusive lock held on a file for the lifetime of this
/// value. Released automatically on drop.
pub struct ExclusiveLock {
    file: File,
    path: PathBuf,
}

impl ExclusiveLock {
    /// Creates (if needed) and locks `path`. Fails immediately rather than
    /// blocking if another process already holds the lock, matching the
    /// "open fails fast, don't hang" expectation for a conglomerate open.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Io { path: path.clone(), source })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::AlreadyLocked { path })
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("failed to release lock on {}: {e}", self.path.display());
        }
    }
}
