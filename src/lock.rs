//! Advisory lock serializing top-level operations on one backup root.
//!
//! A backup and a retention cleanup racing on the same root could delete a
//! generation that is still being written, so [`crate::service::BackupService`]
//! holds this lock around every mutating operation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::{BackupError, Result};

/// Lock file name inside the backup root
pub const LOCK_FILE_NAME: &str = ".backup.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: DateTime<Utc>,
    operation: String,
}

/// Held lock. The file is removed when the guard is dropped.
#[derive(Debug)]
pub struct BackupLock {
    path: PathBuf,
}

impl BackupLock {
    /// Acquire the lock on `root` for `operation`.
    ///
    /// A lock file older than `stale_after` is treated as left behind by a
    /// killed process and replaced. A fresh one fails with
    /// [`BackupError::Locked`].
    pub fn acquire(root: &Path, operation: &str, stale_after: Duration) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| BackupError::Io(format!("Failed to create backup root {}: {}", root.display(), e)))?;
        let path = root.join(LOCK_FILE_NAME);

        let entry = LockEntry {
            hostname: hostname(),
            pid: std::process::id(),
            time: Utc::now(),
            operation: operation.to_string(),
        };
        let data = serde_json::to_vec(&entry)?;

        match try_create(&path, &data) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = read_entry(&path);
                match holder {
                    Some(existing) if Utc::now() - existing.time <= stale_after => {
                        return Err(BackupError::Locked(format!(
                            "{} (pid {}, {} since {})",
                            existing.hostname, existing.pid, existing.operation, existing.time
                        )));
                    }
                    _ => {
                        warn!(lock = %path.display(), "Replacing stale or unreadable backup lock");
                        let _ = std::fs::remove_file(&path);
                        try_create(&path, &data).map_err(|e| {
                            if e.kind() == ErrorKind::AlreadyExists {
                                BackupError::Locked("concurrent acquirer".to_string())
                            } else {
                                BackupError::Io(format!("Failed to create lock file: {}", e))
                            }
                        })?;
                    }
                }
            }
            Err(e) => return Err(BackupError::Io(format!("Failed to create lock file: {}", e))),
        }

        debug!(lock = %path.display(), operation, "Acquired backup lock");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BackupLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release backup lock");
        }
    }
}

fn try_create(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn read_entry(path: &Path) -> Option<LockEntry> {
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let first = BackupLock::acquire(dir.path(), "create_backup", Duration::hours(6)).unwrap();
        let second = BackupLock::acquire(dir.path(), "cleanup", Duration::hours(6));
        assert!(matches!(second, Err(BackupError::Locked(_))));
        drop(first);
        assert!(BackupLock::acquire(dir.path(), "cleanup", Duration::hours(6)).is_ok());
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let lock = BackupLock::acquire(dir.path(), "restore", Duration::hours(6)).unwrap();
        let path = lock.path().to_path_buf();
        assert!(path.exists());
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let stale = LockEntry {
            hostname: "old-host".to_string(),
            pid: 1,
            time: Utc::now() - Duration::hours(12),
            operation: "create_backup".to_string(),
        };
        std::fs::write(dir.path().join(LOCK_FILE_NAME), serde_json::to_vec(&stale).unwrap()).unwrap();

        let lock = BackupLock::acquire(dir.path(), "cleanup", Duration::hours(6)).unwrap();
        let entry = read_entry(lock.path()).unwrap();
        assert_eq!(entry.operation, "cleanup");
    }
}
