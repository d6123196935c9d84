use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::worktree_manager::CommandRunner;

/// Tracked-file listing with a time-to-live.
///
/// Owned by whoever drives dispatch; nothing here is global.
pub struct FileIndex {
    ttl: Duration,
    cached: Option<CachedListing>,
}

struct CachedListing {
    root: PathBuf,
    fetched_at: Instant,
    files: Vec<String>,
}

impl FileIndex {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cached: None }
    }

    /// Files tracked by git under `root`, refreshed when stale or for a new root.
    ///
    /// A failing `git ls-files` yields an empty list and is not cached.
    pub fn tracked_files(&mut self, root: &Path, runner: &dyn CommandRunner) -> Vec<String> {
        if let Some(cached) = &self.cached {
            if cached.root == root && cached.fetched_at.elapsed() < self.ttl {
                return cached.files.clone();
            }
        }

        let Some(dir) = root.to_str() else {
            return Vec::new();
        };
        let files: Vec<String> = match runner.run_git(dir, &["ls-files"]) {
            Ok(out) if out.success => out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Ok(out) => {
                debug!(stderr = %out.stderr.trim(), "git ls-files failed");
                return Vec::new();
            }
            Err(e) => {
                debug!(error = %e, "git ls-files failed");
                return Vec::new();
            }
        };

        self.cached = Some(CachedListing {
            root: root.to_path_buf(),
            fetched_at: Instant::now(),
            files: files.clone(),
        });
        files
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

impl Default for FileIndex {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
