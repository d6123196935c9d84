use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{wave_branch_name, Layer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorktreeError {
    /// The branch name contained nothing usable after sanitisation.
    #[error("invalid branch name: {0:?}")]
    InvalidBranchName(String),
    /// A path or ref contained a quote or NUL byte.
    #[error("unsafe {field} rejected: {value:?}")]
    UnsafeInput { field: &'static str, value: String },
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorktreeError>;

// ---------------------------------------------------------------------------
// CommandRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over subprocess execution so git and verify commands can be mocked.
pub trait CommandRunner: Send + Sync {
    /// Run `program args..` in `dir` and capture its exit status and output.
    fn run(&self, dir: &str, program: &str, args: &[&str]) -> std::result::Result<CommandOutput, String>;

    fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<CommandOutput, String> {
        self.run(dir, "git", args)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runner that shells out via `std::process::Command`.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, dir: &str, program: &str, args: &[&str]) -> std::result::Result<CommandOutput, String> {
        let output = std::process::Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| format!("{program}: {e}"))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A worktree created for one layer of a wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveWorktree {
    pub layer: Layer,
    pub path: PathBuf,
    pub branch: String,
}

/// Outcome of merging a worktree branch back into the current branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged,
    /// Conflicting paths; the merge was aborted and the repository is unchanged.
    Conflict(Vec<String>),
    /// Any other failure. Nothing is cleaned up.
    Failed(String),
}

impl MergeOutcome {
    pub fn success(&self) -> bool {
        matches!(self, MergeOutcome::Merged)
    }

    pub fn conflicts(&self) -> bool {
        matches!(self, MergeOutcome::Conflict(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMergeResult {
    pub layer: Layer,
    pub branch: String,
    pub outcome: MergeOutcome,
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveMergeSummary {
    pub merged_count: usize,
    pub conflict_count: usize,
    pub results: Vec<LayerMergeResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub passed: bool,
    pub skipped: bool,
    pub output: String,
}

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeEntry {
    pub path: String,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub detached: bool,
    pub bare: bool,
}

// ---------------------------------------------------------------------------
// WaveWorkspace capability
// ---------------------------------------------------------------------------

/// Workspace operations the wave state machine depends on.
pub trait WaveWorkspace {
    /// Create one worktree per layer; all or nothing.
    fn provision(&self, wave_index: u32, feature_slug: &str, layers: &[Layer]) -> Result<Vec<WaveWorktree>>;

    fn verify(&self, worktree: &WaveWorktree, command: Option<&str>) -> VerifyOutcome;

    fn merge_and_cleanup(&self, worktrees: &[WaveWorktree], target: Option<&str>) -> WaveMergeSummary;
}

// ---------------------------------------------------------------------------
// WorktreeManager
// ---------------------------------------------------------------------------

/// Creates, merges and removes the per-layer worktrees of a wave run.
///
/// Worktrees live under `{root}/.wavesmith/worktrees/{branch}` unless a
/// different directory is configured.
pub struct WorktreeManager {
    root: PathBuf,
    worktree_dir: PathBuf,
    base_branch: Option<String>,
    runner: Box<dyn CommandRunner>,
}

impl WorktreeManager {
    /// Create a manager that shells out to the real `git` binary.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_runner(root, Box::new(SystemRunner))
    }

    /// Create a manager with a custom runner (for testing).
    pub fn with_runner(root: impl Into<PathBuf>, runner: Box<dyn CommandRunner>) -> Self {
        let root = root.into();
        let worktree_dir = root.join(crate::paths::STATE_DIR).join("worktrees");
        Self {
            root,
            worktree_dir,
            base_branch: None,
            runner,
        }
    }

    pub fn with_worktree_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.worktree_dir = dir.into();
        self
    }

    /// Branch wave worktrees start from. `None` keeps `HEAD`.
    pub fn with_base_branch(mut self, base_branch: Option<String>) -> Self {
        self.base_branch = base_branch;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktree_dir.join(branch)
    }

    fn root_str(&self) -> Result<&str> {
        let root = self.root.to_str().ok_or_else(|| WorktreeError::UnsafeInput {
            field: "root",
            value: self.root.display().to_string(),
        })?;
        validate_input("root", root)?;
        Ok(root)
    }

    /// Create a worktree and a new branch rooted at `base_branch` (default `HEAD`).
    pub fn create_worktree(&self, branch_name: &str, base_branch: Option<&str>) -> Result<(PathBuf, String)> {
        let branch = sanitize_branch_name(branch_name)?;
        let base = base_branch.unwrap_or("HEAD");
        validate_input("base branch", base)?;

        let path = self.worktree_path(&branch);
        let path_str = path.to_str().ok_or_else(|| WorktreeError::UnsafeInput {
            field: "path",
            value: path.display().to_string(),
        })?;
        validate_input("path", path_str)?;
        let root = self.root_str()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(branch = %branch, path = %path.display(), base, "creating worktree");
        let output = self
            .runner
            .run_git(root, &["worktree", "add", "-b", &branch, path_str, base])
            .map_err(WorktreeError::GitCommand)?;
        if !output.success {
            return Err(WorktreeError::GitCommand(output.stderr.trim().to_string()));
        }
        Ok((path, branch))
    }

    /// Provision every layer of a wave. On failure, already-created worktrees are removed.
    pub fn create_wave_worktrees(
        &self,
        wave_index: u32,
        feature_slug: &str,
        layers: &[Layer],
    ) -> Result<Vec<WaveWorktree>> {
        let mut created: Vec<WaveWorktree> = Vec::with_capacity(layers.len());
        for layer in layers {
            let requested = wave_branch_name(wave_index, feature_slug, *layer);
            match self.create_worktree(&requested, self.base_branch.as_deref()) {
                Ok((path, branch)) => created.push(WaveWorktree {
                    layer: *layer,
                    path,
                    branch,
                }),
                Err(e) => {
                    warn!(
                        wave_index,
                        layer = %layer,
                        error = %e,
                        rollback = created.len(),
                        "worktree provisioning failed, rolling back"
                    );
                    for wt in &created {
                        if let Err(re) = self.remove_worktree(&wt.path) {
                            warn!(path = %wt.path.display(), error = %re, "rollback removal failed");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// Remove a worktree; if git says it is already gone, prune instead.
    pub fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_str = path.to_str().ok_or_else(|| WorktreeError::UnsafeInput {
            field: "path",
            value: path.display().to_string(),
        })?;
        validate_input("path", path_str)?;
        let root = self.root_str()?;

        let output = self
            .runner
            .run_git(root, &["worktree", "remove", path_str, "--force"])
            .map_err(WorktreeError::GitCommand)?;
        if output.success {
            debug!(path = path_str, "worktree removed");
            return Ok(());
        }

        let message = output.combined();
        if is_already_gone(&message) {
            warn!(path = path_str, "worktree already gone, pruning");
            let prune = self
                .runner
                .run_git(root, &["worktree", "prune"])
                .map_err(WorktreeError::GitCommand)?;
            if !prune.success {
                return Err(WorktreeError::GitCommand(prune.stderr.trim().to_string()));
            }
            return Ok(());
        }
        Err(WorktreeError::GitCommand(output.stderr.trim().to_string()))
    }

    /// Merge `branch` into the current branch with `--no-ff`.
    ///
    /// Conflicts are aborted before returning so the repository is unchanged.
    /// If the abort itself fails the outcome is `Failed`, which keeps the worktree.
    pub fn merge_worktree(&self, branch: &str, target: Option<&str>) -> Result<MergeOutcome> {
        validate_input("branch", branch)?;
        let target = target.unwrap_or("HEAD");
        validate_input("target", target)?;
        let root = self.root_str()?;

        let message = format!("merge: wave {branch} into {target}");
        info!(branch, target, "merging wave branch");
        let output = match self
            .runner
            .run_git(root, &["merge", "--no-ff", branch, "-m", &message])
        {
            Ok(output) => output,
            Err(e) => return Ok(MergeOutcome::Failed(e)),
        };
        if output.success {
            return Ok(MergeOutcome::Merged);
        }

        let text = output.combined();
        if !text.to_lowercase().contains("conflict") {
            warn!(branch, stderr = %output.stderr.trim(), "merge failed without conflicts");
            return Ok(MergeOutcome::Failed(output.stderr.trim().to_string()));
        }

        let files: Vec<String> = match self
            .runner
            .run_git(root, &["diff", "--name-only", "--diff-filter=U"])
        {
            Ok(diff) if diff.success => diff
                .stdout
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .collect(),
            _ => text
                .lines()
                .filter(|l| l.contains("CONFLICT"))
                .map(|l| l.trim().to_string())
                .collect(),
        };

        let abort_error = match self.runner.run_git(root, &["merge", "--abort"]) {
            Ok(abort) if abort.success => None,
            Ok(abort) => Some(abort.stderr.trim().to_string()),
            Err(e) => Some(e),
        };
        if let Some(e) = abort_error {
            warn!(branch, conflicts = ?files, error = %e, "merge --abort failed, repository left mid-merge");
            return Ok(MergeOutcome::Failed(format!(
                "conflicts in {} and merge --abort failed: {e}",
                files.join(", ")
            )));
        }
        warn!(branch, conflicts = ?files, "merge conflicts detected, merge aborted");
        Ok(MergeOutcome::Conflict(files))
    }

    /// Merge every worktree in order, removing those that merged or aborted cleanly.
    pub fn merge_and_cleanup_wave(&self, worktrees: &[WaveWorktree], target: Option<&str>) -> WaveMergeSummary {
        let mut summary = WaveMergeSummary::default();
        for wt in worktrees {
            let outcome = self
                .merge_worktree(&wt.branch, target)
                .unwrap_or_else(|e| MergeOutcome::Failed(e.to_string()));

            let mut removed = false;
            if outcome.success() || outcome.conflicts() {
                match self.remove_worktree(&wt.path) {
                    Ok(()) => removed = true,
                    Err(e) => warn!(path = %wt.path.display(), error = %e, "worktree cleanup failed"),
                }
            }
            match &outcome {
                MergeOutcome::Merged => summary.merged_count += 1,
                MergeOutcome::Conflict(_) => summary.conflict_count += 1,
                MergeOutcome::Failed(_) => {}
            }
            summary.results.push(LayerMergeResult {
                layer: wt.layer,
                branch: wt.branch.clone(),
                outcome,
                removed,
            });
        }
        info!(
            merged = summary.merged_count,
            conflicts = summary.conflict_count,
            total = worktrees.len(),
            "wave merge finished"
        );
        summary
    }

    /// List worktrees known to git. Any failure yields an empty list.
    pub fn list_worktrees(&self) -> Vec<WorktreeEntry> {
        let Ok(root) = self.root_str() else {
            return Vec::new();
        };
        match self.runner.run_git(root, &["worktree", "list", "--porcelain"]) {
            Ok(output) if output.success => parse_porcelain(&output.stdout),
            Ok(output) => {
                debug!(stderr = %output.stderr.trim(), "worktree list failed");
                Vec::new()
            }
            Err(e) => {
                debug!(error = %e, "worktree list failed");
                Vec::new()
            }
        }
    }

    /// Run the verify command inside a worktree. No command means a skipped pass.
    pub fn verify_worktree(&self, path: &Path, command: Option<&str>) -> VerifyOutcome {
        let Some(command) = command else {
            return VerifyOutcome {
                passed: true,
                skipped: true,
                output: String::new(),
            };
        };
        let Some(dir) = path.to_str() else {
            return VerifyOutcome {
                passed: false,
                skipped: false,
                output: format!("non-utf8 path {}", path.display()),
            };
        };
        if let Err(e) = validate_input("path", dir) {
            return VerifyOutcome {
                passed: false,
                skipped: false,
                output: e.to_string(),
            };
        }

        match self.runner.run(dir, "sh", &["-c", command]) {
            Ok(output) => {
                debug!(path = dir, command, passed = output.success, "verify finished");
                VerifyOutcome {
                    passed: output.success,
                    skipped: false,
                    output: output.combined().trim().to_string(),
                }
            }
            Err(e) => VerifyOutcome {
                passed: false,
                skipped: false,
                output: e,
            },
        }
    }
}

impl WaveWorkspace for WorktreeManager {
    fn provision(&self, wave_index: u32, feature_slug: &str, layers: &[Layer]) -> Result<Vec<WaveWorktree>> {
        self.create_wave_worktrees(wave_index, feature_slug, layers)
    }

    fn verify(&self, worktree: &WaveWorktree, command: Option<&str>) -> VerifyOutcome {
        self.verify_worktree(&worktree.path, command)
    }

    fn merge_and_cleanup(&self, worktrees: &[WaveWorktree], target: Option<&str>) -> WaveMergeSummary {
        self.merge_and_cleanup_wave(worktrees, target)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replace disallowed characters with `-`, collapse runs and trim the ends.
///
/// Letters and digits of any script survive, as do `/`, `_` and `-`.
pub fn sanitize_branch_name(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let keep = c.is_alphanumeric() || matches!(c, '/' | '_' | '-');
        let c = if keep { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        return Err(WorktreeError::InvalidBranchName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Reject quote characters and NUL bytes in anything handed to a subprocess.
pub fn validate_input(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('"') || value.contains('\0') {
        return Err(WorktreeError::UnsafeInput {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn is_already_gone(message: &str) -> bool {
    ["not a working tree", "does not exist", "is not a valid"]
        .iter()
        .any(|sig| message.contains(sig))
}

fn parse_porcelain(text: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in text.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            current = Some(WorktreeEntry {
                path: path.to_string(),
                ..WorktreeEntry::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            entry.branch = Some(short.to_string());
        } else if line == "detached" {
            entry.detached = true;
        } else if line == "bare" {
            entry.bare = true;
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_wave_branch_shape() {
        assert_eq!(
            sanitize_branch_name("wave-1/user-auth/entity").unwrap(),
            "wave-1/user-auth/entity"
        );
        assert_eq!(sanitize_branch_name("  feat: a b!! ").unwrap(), "feat-a-b");
        assert_eq!(sanitize_branch_name("wave-2/회원가입/dto").unwrap(), "wave-2/회원가입/dto");
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        assert!(matches!(
            sanitize_branch_name("!!! ???"),
            Err(WorktreeError::InvalidBranchName(_))
        ));
        assert!(sanitize_branch_name("").is_err());
    }

    #[test]
    fn validate_input_rejects_quotes_and_nul() {
        assert!(validate_input("path", "/tmp/a\"b").is_err());
        assert!(validate_input("path", "/tmp/a\0b").is_err());
        assert!(validate_input("path", "/tmp/ok path").is_ok());
    }

    #[test]
    fn porcelain_parsing() {
        let text = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                    worktree /repo/.wavesmith/worktrees/wave-1/x/entity\nHEAD def\nbranch refs/heads/wave-1/x/entity\n\n\
                    worktree /repo/detached\nHEAD 123\ndetached\n\n\
                    worktree /bare\nbare\n\n\
                    worktree /remote\nbranch refs/remotes/origin/dev\n";
        let entries = parse_porcelain(text);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("wave-1/x/entity"));
        assert!(entries[2].detached);
        assert!(entries[2].branch.is_none());
        assert!(entries[3].bare);
        assert_eq!(entries[4].branch.as_deref(), Some("refs/remotes/origin/dev"));
    }

    #[test]
    fn already_gone_signatures() {
        assert!(is_already_gone("fatal: '/x' is not a working tree"));
        assert!(is_already_gone("error: path does not exist"));
        assert!(!is_already_gone("fatal: permission denied"));
    }
}
