use std::path::{Path, PathBuf};

/// Hidden directory, relative to the project root, holding all persisted documents.
pub const STATE_DIR: &str = ".wavesmith";

pub const TEAM_STATE_FILE: &str = "team-state.json";
pub const METRICS_FILE: &str = "wave-metrics.json";
pub const POLICY_FILE: &str = "wave-policy.json";
pub const CONFIG_FILE: &str = "config.toml";

/// Locations of the per-project documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
    state_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self { root, state_dir }
    }

    /// Use a state directory name other than [`STATE_DIR`].
    pub fn with_state_dir(root: impl Into<PathBuf>, dir_name: &str) -> Self {
        let root = root.into();
        let state_dir = root.join(dir_name);
        Self { root, state_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn team_state(&self) -> PathBuf {
        self.state_dir.join(TEAM_STATE_FILE)
    }

    pub fn metrics(&self) -> PathBuf {
        self.state_dir.join(METRICS_FILE)
    }

    pub fn policy(&self) -> PathBuf {
        self.state_dir.join(POLICY_FILE)
    }

    pub fn config(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn worktrees(&self) -> PathBuf {
        self.state_dir.join("worktrees")
    }
}
