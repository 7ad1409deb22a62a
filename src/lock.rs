//! Per-repository lock files.
//!
//! TestSmellDetector checks commits out inside a shared clone of each
//! repository, so two runs against the same repository must not overlap.
//! A lock is a file created with `create_new` under the lock directory; it is
//! removed when the [`RepoLock`] guard is dropped. Lock files left behind by
//! a crashed run are broken once they are older than the stale timeout.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cancel;
use crate::config::LockPolicy;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),
}

/// Contents of a lock file, for diagnosing who holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

/// Lock file path for a repository key such as `owner/repo`.
pub fn lock_path(lock_dir: &Path, repo_key: &str) -> PathBuf {
    lock_dir.join(format!("{}.lock", repo_key.replace('/', "__")))
}

impl RepoLock {
    /// Block until the lock for `repo_key` is acquired.
    pub fn acquire(lock_dir: &Path, repo_key: &str, policy: &LockPolicy) -> Result<Self, LockError> {
        let path = lock_path(lock_dir, repo_key);
        let mut announced = false;
        loop {
            if let Some(lock) = Self::try_acquire_path(&path, policy)? {
                return Ok(lock);
            }
            if cancel::is_cancelled() {
                return Err(LockError::Cancelled(path.display().to_string()));
            }
            if !announced {
                debug!("Waiting for lock {}", path.display());
                announced = true;
            }
            thread::sleep(policy.poll_interval);
        }
    }

    /// Take the lock if it is free or stale; `None` if someone else holds it.
    pub fn try_acquire(
        lock_dir: &Path,
        repo_key: &str,
        policy: &LockPolicy,
    ) -> Result<Option<Self>, LockError> {
        Self::try_acquire_path(&lock_path(lock_dir, repo_key), policy)
    }

    fn try_acquire_path(path: &Path, policy: &LockPolicy) -> Result<Option<Self>, LockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        if let Some(lock) = Self::create(path)? {
            return Ok(Some(lock));
        }
        if !is_stale(path, policy.stale_after) {
            return Ok(None);
        }
        Self::break_stale(path, policy)
    }

    /// Create the lock file and record its owner; `None` if it already exists.
    fn create(path: &Path) -> Result<Option<Self>, LockError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let owner = LockOwner {
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                let body = serde_json::to_string(&owner).unwrap_or_default();
                // The lock is held as soon as the file exists; the body is informational.
                if let Err(e) = file.write_all(body.as_bytes()) {
                    debug!("Could not record lock owner in {}: {}", path.display(), e);
                }
                Ok(Some(Self {
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(io_error(path, source)),
        }
    }

    /// Replace a stale lock. Only the holder of the break guard removes the
    /// lock file, and only after seeing it still stale.
    fn break_stale(path: &Path, policy: &LockPolicy) -> Result<Option<Self>, LockError> {
        let guard_path = break_guard_path(path);
        let Some(guard) = Self::create(&guard_path)? else {
            if is_stale(&guard_path, policy.stale_after) {
                warn!("Removing stale break guard {}", guard_path.display());
                remove_if_present(&guard_path)?;
            }
            return Ok(None);
        };

        if !is_stale(path, policy.stale_after) {
            return Ok(None);
        }
        warn!("Breaking stale lock {}", path.display());
        remove_if_present(path)?;
        let lock = Self::create(path);
        drop(guard);
        lock
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to release lock {}: {}", self.path.display(), e);
            }
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Guard file held while a stale lock is being replaced.
fn break_guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".break");
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Age of a lock, preferring the recorded acquisition time over file mtime.
fn lock_age(path: &Path) -> Option<Duration> {
    let recorded = fs::read_to_string(path)
        .ok()
        .and_then(|body| serde_json::from_str::<LockOwner>(&body).ok())
        .map(|owner| owner.acquired_at);

    let acquired_at = match recorded {
        Some(at) => at,
        None => {
            let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
            DateTime::<Utc>::from(modified)
        }
    };
    (Utc::now() - acquired_at).to_std().ok()
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    lock_age(path).is_some_and(|age| age > stale_after)
}
