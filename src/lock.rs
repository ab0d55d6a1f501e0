// src/lock.rs

//! Per-experiment mutual exclusion across processes.
//!
//! The lock is an advisory OS file lock on `<root>/<expid>/tmp/expflow.lock`,
//! released when the [`ExperimentLock`] is dropped or the process dies.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{ExpflowError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct LockManager {
    root: PathBuf,
}

/// Held for as long as this process runs the experiment.
#[derive(Debug)]
pub struct ExperimentLock {
    expid: String,
    path: PathBuf,
    file: File,
}

impl ExperimentLock {
    pub fn expid(&self) -> &str {
        &self.expid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExperimentLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(expid = %self.expid, error = %e, "failed to release experiment lock");
        } else {
            debug!(expid = %self.expid, "experiment lock released");
        }
    }
}

impl LockManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn lock_path(&self, expid: &str) -> PathBuf {
        self.root.join(expid).join("tmp").join("expflow.lock")
    }

    /// Try to take the lock for `expid`, retrying until `timeout` elapses.
    ///
    /// Returns [`ExpflowError::AlreadyLocked`] when another holder keeps it.
    /// Waiting between attempts yields to the runtime.
    pub async fn acquire(&self, expid: &str, timeout: Duration) -> Result<ExperimentLock> {
        let path = self.lock_path(expid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ExpflowError::AlreadyLocked(expid.to_string()));
                    }
                    tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }

        file.set_len(0)?;
        let payload = serde_json::json!({ "pid": std::process::id() });
        writeln!(file, "{payload}")?;
        file.sync_all()?;
        debug!(expid, path = %path.display(), "experiment lock acquired");

        Ok(ExperimentLock {
            expid: expid.to_string(),
            path,
            file,
        })
    }
}
