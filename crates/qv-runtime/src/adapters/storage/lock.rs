//! # Data Directory Locking
//!
//! Ensures one process owns a data directory at a time.
//!
//! The replay ledger serializes issue/consume through an in-process mutex.
//! A second process over the same files would bypass it and could redeem a
//! token twice, so the runtime takes an exclusive `fs2` lock before opening
//! storage and holds it for its lifetime.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::debug;

/// Errors from data directory locking.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Data directory already in use{} ({})", holder(.pid), .path.display())]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },

    #[error("Failed to write PID to lock file: {0}")]
    WriteFailed(#[source] io::Error),
}

fn holder(pid: &Option<u32>) -> String {
    pid.map(|p| format!(" by process {}", p)).unwrap_or_default()
}

/// Exclusive lock on a data directory, released on drop.
pub struct DatabaseLock {
    /// Kept open to hold the lock
    file: File,
    path: PathBuf,
    pid: u32,
}

impl DatabaseLock {
    const LOCK_FILE: &'static str = "QV.LOCK";

    /// Create `data_dir` if needed and lock it.
    ///
    /// # Errors
    ///
    /// Returns `LockError::AlreadyLocked` if another process holds the lock.
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        fs::create_dir_all(data_dir).map_err(LockError::CreateFailed)?;
        let lock_path = data_dir.join(Self::LOCK_FILE);

        // No truncate: the holder's PID must stay readable for the error
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyLocked {
                pid: Self::read_existing_pid(&lock_path),
                path: lock_path,
            });
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", pid).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;
        debug!(path = %lock_path.display(), pid, "Data directory locked");

        Ok(Self {
            file,
            path: lock_path,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for DatabaseLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_directory_and_records_pid() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("qv");

        let lock = DatabaseLock::acquire(&dir).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.pid(), std::process::id());

        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[test]
    fn test_second_lock_fails_with_holder_pid() {
        let temp = TempDir::new().unwrap();
        let _first = DatabaseLock::acquire(temp.path()).unwrap();

        match DatabaseLock::acquire(temp.path()) {
            Err(LockError::AlreadyLocked { pid, path }) => {
                assert_eq!(pid, Some(std::process::id()));
                assert!(path.ends_with("QV.LOCK"));
            }
            Err(other) => panic!("expected AlreadyLocked, got {}", other),
            Ok(_) => panic!("second lock must fail"),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = TempDir::new().unwrap();
        {
            let _lock = DatabaseLock::acquire(temp.path()).unwrap();
        }
        assert!(DatabaseLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn test_error_message_names_process() {
        let err = LockError::AlreadyLocked {
            pid: Some(42),
            path: PathBuf::from("/data/QV.LOCK"),
        };
        assert_eq!(
            err.to_string(),
            "Data directory already in use by process 42 (/data/QV.LOCK)"
        );
    }
}
