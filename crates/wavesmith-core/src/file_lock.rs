//! Cross-process exclusive lock for the persisted documents.
//!
//! A lock is a sibling file `<document>.lock` created with `O_CREAT | O_EXCL`
//! (`create_new`). Exactly one process wins the create; everyone else polls
//! with exponential backoff until the holder removes the file or the wait
//! times out.
//!
//! ## Stale locks
//!
//! A holder that crashed never removes its file. Once a lock is older than
//! `stale_after` it is taken over: removed (only if it still carries the same
//! token that was judged stale) and the create is retried.
//!
//! ## Ownership
//!
//! Each acquisition writes a random token. [`LockGuard`] only removes the file
//! on drop if the token on disk is still its own, so a holder that was taken
//! over cannot delete its successor's lock.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited_ms} ms waiting for lock {path}")]
    Timeout { path: PathBuf, waited_ms: u128 },
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub timeout: Duration,
    pub stale_after: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            stale_after: Duration::from_millis(10_000),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub pid: u32,
    pub token: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Result of a single acquisition attempt.
#[derive(Debug)]
pub enum AcquireResult {
    /// We created the lock file and own it.
    Acquired(LockGuard),
    /// Someone else holds a live lock.
    Held,
    /// A stale lock was removed; try again.
    StaleRemoved,
}

#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    options: LockOptions,
}

impl FileLock {
    /// Lock guarding `document` (the lock lives at `<document>.lock`).
    pub fn for_document(document: &Path, options: LockOptions) -> Self {
        let mut name = document.as_os_str().to_os_string();
        name.push(".lock");
        Self {
            path: PathBuf::from(name),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One non-blocking attempt.
    pub fn try_acquire(&self) -> Result<AcquireResult, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                let record = LockRecord {
                    pid: std::process::id(),
                    token: Uuid::new_v4(),
                    acquired_at: Utc::now(),
                };
                let json = serde_json::to_string(&record).map_err(std::io::Error::other)?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
                Ok(AcquireResult::Acquired(LockGuard {
                    path: self.path.clone(),
                    token: record.token,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if self.remove_if_stale()? {
                    Ok(AcquireResult::StaleRemoved)
                } else {
                    Ok(AcquireResult::Held)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block (polling with exponential backoff) until the lock is ours or the timeout passes.
    pub fn acquire(&self) -> Result<LockGuard, LockError> {
        let started = Instant::now();
        let mut backoff = self.options.initial_backoff;
        loop {
            match self.try_acquire()? {
                AcquireResult::Acquired(guard) => {
                    debug!(path = %self.path.display(), "lock acquired");
                    return Ok(guard);
                }
                AcquireResult::StaleRemoved => continue,
                AcquireResult::Held => {}
            }

            let waited = started.elapsed();
            if waited >= self.options.timeout {
                warn!(path = %self.path.display(), waited_ms = waited.as_millis(), "lock wait timed out");
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    waited_ms: waited.as_millis(),
                });
            }
            let remaining = self.options.timeout - waited;
            std::thread::sleep(backoff.min(remaining));
            backoff = (backoff * 2).min(self.options.max_backoff);
        }
    }

    /// Run `f` while holding the lock. The lock is released even if `f` fails.
    pub fn with_lock<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<LockError>,
    {
        let _guard = self.acquire()?;
        f()
    }

    fn remove_if_stale(&self) -> std::io::Result<bool> {
        let record = read_record(&self.path);
        let age = match &record {
            Some(r) => (Utc::now() - r.acquired_at).to_std().unwrap_or(Duration::ZERO),
            // Unreadable or half-written: fall back to the file's mtime.
            None => match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
                Ok(modified) => SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
                Err(e) => return Err(e),
            },
        };
        if age <= self.options.stale_after {
            return Ok(false);
        }

        if record.as_ref().map(|r| r.token) != read_record(&self.path).map(|r| r.token) {
            return Ok(false);
        }
        info!(
            path = %self.path.display(),
            age_ms = age.as_millis(),
            holder_pid = record.as_ref().map(|r| r.pid),
            "taking over stale lock"
        );
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }
}

/// Held lock. Dropping it removes the lock file if it is still ours.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: Uuid,
}

impl LockGuard {
    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match read_record(&self.path) {
            Some(record) if record.token == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to release lock");
                }
            }
            _ => warn!(path = %self.path.display(), "lock no longer ours, leaving it in place"),
        }
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(120),
            stale_after: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[test]
    fn lock_path_is_sibling_of_document() {
        let lock = FileLock::for_document(Path::new("/tmp/x/team-state.json"), quick());
        assert_eq!(lock.path(), Path::new("/tmp/x/team-state.json.lock"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::for_document(&dir.path().join("doc.json"), quick());
        {
            let _guard = lock.acquire().unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::for_document(&dir.path().join("doc.json"), quick());
        let _guard = lock.acquire().unwrap();
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.json");
        let lock = FileLock::for_document(&doc, quick());
        let stale = LockRecord {
            pid: 999_999,
            token: Uuid::new_v4(),
            acquired_at: Utc::now() - chrono::Duration::minutes(10),
        };
        std::fs::write(lock.path(), serde_json::to_string(&stale).unwrap()).unwrap();

        let guard = lock.acquire().unwrap();
        assert_ne!(guard.token(), stale.token);
    }

    #[test]
    fn taken_over_guard_does_not_delete_successor() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::for_document(&dir.path().join("doc.json"), quick());
        let guard = lock.acquire().unwrap();

        let successor = LockRecord {
            pid: 1,
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        std::fs::write(lock.path(), serde_json::to_string(&successor).unwrap()).unwrap();
        drop(guard);
        assert!(lock.path().exists());
    }

    #[test]
    fn with_lock_propagates_closure_errors() {
        #[derive(Debug)]
        enum E {
            Lock,
            Inner,
        }
        impl From<LockError> for E {
            fn from(_: LockError) -> Self {
                E::Lock
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::for_document(&dir.path().join("doc.json"), quick());
        let result: Result<(), E> = lock.with_lock(|| Err(E::Inner));
        assert!(matches!(result, Err(E::Inner)));
        assert!(!lock.path().exists());
        let _ = E::Lock;
    }
}
