pub mod dispatch;
pub mod finalize;
pub mod plan;
pub mod policy;
pub mod reassign;
pub mod record;
pub mod start;
pub mod status;
pub mod task;
pub mod worktrees;

use std::path::PathBuf;

use anyhow::Context;
use serde::Serialize;
use wavesmith_agents::dispatcher::WaveDispatcher;
use wavesmith_core::config::Config;
use wavesmith_core::file_index::FileIndex;
use wavesmith_core::paths::ProjectPaths;
use wavesmith_core::project::detect_verify_command;
use wavesmith_core::state_store::StateStore;
use wavesmith_core::types::WaveState;
use wavesmith_core::worktree_manager::{SystemRunner, WorktreeManager};
use wavesmith_intelligence::PolicyLearner;

/// Everything a command needs to know about the project it runs in.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    pub paths: ProjectPaths,
}

impl Project {
    pub fn open(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match root {
            Some(root) => root,
            None => std::env::current_dir().context("cannot determine the current directory")?,
        };
        let config = Config::load_for_project(&root)
            .with_context(|| format!("failed to load configuration for {}", root.display()))?;
        Ok(Self::with_config(root, config))
    }

    pub fn with_config(root: PathBuf, config: Config) -> Self {
        let paths = config.project_paths(&root);
        Self { root, config, paths }
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(&self.paths, self.config.locking.options())
    }

    pub fn worktrees(&self) -> WorktreeManager {
        WorktreeManager::new(&self.root)
            .with_worktree_dir(self.paths.worktrees())
            .with_base_branch(self.config.general.base_branch.clone())
    }

    pub fn learner(&self) -> PolicyLearner {
        PolicyLearner::new(&self.paths, self.config.locking.options(), &self.config.metrics)
    }

    pub fn verify_command(&self) -> Option<String> {
        detect_verify_command(&self.root)
    }

    /// Dispatcher wired with the learned policy, tracked files and team settings.
    pub fn dispatcher(&self) -> WaveDispatcher {
        let tracked = FileIndex::default().tracked_files(&self.root, &SystemRunner);
        WaveDispatcher::new(Box::new(self.learner()))
            .with_level(self.config.general.level)
            .with_verify_command(self.verify_command())
            .with_tracked_files(tracked)
            .with_delegate_mode(self.config.team.delegate_mode)
    }

    pub fn require_state(&self) -> anyhow::Result<WaveState> {
        self.store()
            .load_wave_execution()
            .context("failed to read team state")?
            .context("no wave execution; run `wavesmith plan` first")
    }

    /// Mutate the stored wave execution under the team lock.
    ///
    /// Keep `f` short: the lock is taken over once it goes stale, so slow
    /// work (provisioning, verify, merge) belongs between two updates.
    pub fn update<T>(&self, f: impl FnOnce(&mut WaveState) -> anyhow::Result<T>) -> anyhow::Result<T> {
        self.store()
            .update_wave_execution(f)?
            .context("no wave execution; run `wavesmith plan` first")
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Project rooted in a temp dir with fast lock settings.
    pub fn project(dir: &tempfile::TempDir) -> Project {
        project_at(dir.path())
    }

    pub fn project_at(root: &std::path::Path) -> Project {
        let mut config = Config::default();
        config.locking.timeout_ms = 500;
        config.locking.backoff_initial_ms = 5;
        config.locking.backoff_max_ms = 20;
        Project::with_config(root.to_path_buf(), config)
    }
}
