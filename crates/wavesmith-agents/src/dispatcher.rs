//! Dispatch instructions for the active wave.
//!
//! The dispatcher only reads state. It resolves who works on each active
//! task, which files they own and must leave alone, how they verify their
//! work, and which learned advisories apply, then renders that as Markdown
//! for the external executor.

use serde::Serialize;
use tracing::debug;
use wavesmith_core::policy::{PolicyAdvisor, PolicySuggestion, SuggestionKind};
use wavesmith_core::types::{Layer, ProjectLevel, TaskStatus, WaveState, WaveStatus};
use wavesmith_core::wave_plan::WavePlan;

use crate::ownership::{do_not_touch, own_patterns, partition_files};
use crate::roster::{implementer, pods_enabled};
use crate::work_pod::{build_pod_protocol, MAX_VERIFY_ATTEMPTS};

/// Tracked files listed per task before the list is summarised.
const MAX_LISTED_FILES: usize = 10;

/// Per-task assignment for one active wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub layer: Layer,
    pub agent: String,
    pub worktree_path: Option<String>,
    pub branch_name: String,
    pub own_patterns: Vec<String>,
    pub do_not_touch: Vec<String>,
    /// Tracked files already owned exclusively by this layer.
    pub existing_files: Vec<String>,
    /// Tracked files also claimed by another active layer.
    pub shared_files: Vec<String>,
    pub verify_command: Option<String>,
    pub retry_of: Option<u32>,
}

pub struct WaveDispatcher {
    advisor: Box<dyn PolicyAdvisor>,
    level: Option<ProjectLevel>,
    verify_command: Option<String>,
    tracked_files: Vec<String>,
    delegate_mode: bool,
}

impl WaveDispatcher {
    pub fn new(advisor: Box<dyn PolicyAdvisor>) -> Self {
        Self {
            advisor,
            level: None,
            verify_command: None,
            tracked_files: Vec::new(),
            delegate_mode: false,
        }
    }

    /// Enables the work-pod protocol for levels that use pods.
    pub fn with_level(mut self, level: ProjectLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_verify_command(mut self, command: Option<String>) -> Self {
        self.verify_command = command;
        self
    }

    pub fn with_tracked_files(mut self, files: Vec<String>) -> Self {
        self.tracked_files = files;
        self
    }

    pub fn with_delegate_mode(mut self, delegate_mode: bool) -> Self {
        self.delegate_mode = delegate_mode;
        self
    }

    /// Assignments for the in-progress tasks of `wave_index`.
    ///
    /// Empty unless the wave is `in_progress`.
    pub fn assignments(&self, state: &WaveState, wave_index: u32) -> Vec<TaskAssignment> {
        let Some(wave) = state.wave(wave_index) else {
            return Vec::new();
        };
        if wave.status != WaveStatus::InProgress {
            return Vec::new();
        }

        let active: Vec<_> = wave
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .collect();
        let layers: Vec<Layer> = active.iter().map(|t| t.layer).collect();
        let ownership = partition_files(&self.tracked_files, &layers);

        active
            .iter()
            .map(|task| TaskAssignment {
                layer: task.layer,
                agent: task
                    .agent_id
                    .clone()
                    .unwrap_or_else(|| implementer(task.layer).to_string()),
                worktree_path: task.worktree_path.clone(),
                branch_name: task.branch_name.clone(),
                own_patterns: own_patterns(task.layer),
                do_not_touch: do_not_touch(task.layer, &layers),
                existing_files: ownership.owned_by(task.layer).to_vec(),
                shared_files: ownership
                    .shared_with(task.layer)
                    .into_iter()
                    .map(String::from)
                    .collect(),
                verify_command: self.verify_command.clone(),
                retry_of: task.retry_of,
            })
            .collect()
    }

    /// Learned advisories relevant to the given assignments.
    pub fn applicable_suggestions(&self, assignments: &[TaskAssignment]) -> Vec<PolicySuggestion> {
        self.advisor
            .suggestions()
            .into_iter()
            .filter(|s| match s.kind {
                SuggestionKind::WaveGrouping => true,
                SuggestionKind::Layer => assignments
                    .iter()
                    .any(|a| s.target.as_deref() == Some(a.layer.as_str())),
                SuggestionKind::Agent => assignments
                    .iter()
                    .any(|a| s.target.as_deref() == Some(a.agent.as_str())),
            })
            .collect()
    }

    /// Markdown dispatch block for the active wave, or an empty string.
    pub fn build_dispatch(&self, state: &WaveState, wave_index: u32) -> String {
        let assignments = self.assignments(state, wave_index);
        if assignments.is_empty() {
            debug!(wave_index, "nothing to dispatch");
            return String::new();
        }
        let suggestions = self.applicable_suggestions(&assignments);
        let pods = self.level.filter(|level| pods_enabled(*level));

        let mut lines = vec!["## Wave Dispatch".to_string()];
        if !suggestions.is_empty() {
            lines.push(String::new());
            lines.push("> **Policy advisories** (learned from previous runs)".to_string());
            for s in &suggestions {
                lines.push(format!("> - {}", s.message));
            }
        }
        lines.push(String::new());
        lines.push(format!(
            "Wave {wave_index}: run {} task(s) **in parallel**, one independent subagent each.",
            assignments.len()
        ));
        if self.delegate_mode {
            lines.push("> Delegate mode: the lead coordinates only and does not take a layer.".to_string());
        }

        if let Some(context) = previous_wave_context(state, wave_index) {
            lines.push(String::new());
            lines.push(context);
        }
        lines.push(String::new());

        for a in &assignments {
            lines.push(format!("### {}", a.layer));
            lines.push(format!("- **agent**: `{}`", a.agent));
            if let Some(path) = &a.worktree_path {
                lines.push(format!("- **worktree**: `{path}`"));
            }
            lines.push(format!("- **branch**: `{}`", a.branch_name));
            if let Some(origin) = a.retry_of {
                lines.push(format!("- **retry**: failed in wave {origin}; this is the only retry"));
            }
            lines.push(format!(
                "- **instruction**: implement the `{}` layer inside its worktree",
                a.layer
            ));
            lines.push(format!("- **OWN FILES**: {}", backticked(&a.own_patterns)));
            if !a.existing_files.is_empty() {
                lines.push(format!("  - existing: {}", summarise(&a.existing_files)));
            }
            if !a.do_not_touch.is_empty() {
                lines.push(format!("- **DO NOT TOUCH**: {}", backticked(&a.do_not_touch)));
            }
            if !a.shared_files.is_empty() {
                lines.push(format!(
                    "- **shared (coordinate before editing)**: {}",
                    summarise(&a.shared_files)
                ));
            }
            if let Some(level) = pods {
                if let Some(protocol) = build_pod_protocol(a.layer, level, a.verify_command.as_deref()) {
                    lines.push(String::new());
                    lines.push(protocol);
                }
            }
            lines.push(String::new());
        }

        if pods.is_none() {
            if let Some(cmd) = &self.verify_command {
                lines.push("### VERIFY".to_string());
                lines.push(format!("After implementing, each subagent must run `{cmd}` in its worktree."));
                lines.push(format!(
                    "On failure fix and rerun (max {MAX_VERIFY_ATTEMPTS} attempts). If it still fails, STOP and report."
                ));
                lines.push(String::new());
            }
        }

        lines.push("### Report format".to_string());
        lines.push("- Files modified:".to_string());
        lines.push("- How verified:".to_string());
        lines.push("- Known issues:".to_string());
        lines.push(String::new());
        lines.push(
            "> Launch every task above **concurrently** as its own subagent; each works only in its worktree."
                .to_string(),
        );
        lines.join("\n")
    }

    /// Whole-plan overview, with the dispatch block for the wave in progress appended.
    pub fn build_execution_markdown(&self, plan: &WavePlan, state: Option<&WaveState>) -> String {
        if plan.waves.is_empty() {
            return String::new();
        }
        let total = plan.waves.len();
        let mut lines = vec![
            "## Wave execution plan".to_string(),
            format!("feature: `{}` | {total} wave(s)", plan.feature_slug),
            String::new(),
        ];

        for pw in &plan.waves {
            let live = state.and_then(|s| s.wave(pw.wave_index));
            let started = live.is_some_and(|w| w.status == WaveStatus::InProgress);
            let layers: Vec<&str> = pw.layers.iter().map(Layer::as_str).collect();
            lines.push(format!(
                "### Wave {}: {}{}",
                pw.wave_index,
                layers.join(", "),
                if started { " (started)" } else { "" }
            ));
            lines.push(format!(
                "- runs in isolated worktrees ({} task(s))",
                pw.tasks.len()
            ));
            for task in &pw.tasks {
                let owner = task.owner.as_ref().map(|o| format!(" ({o})")).unwrap_or_default();
                lines.push(format!("  - `{}`: {}{owner}", task.layer, task.title));
                let provisioned = live
                    .and_then(|w| w.tasks.iter().find(|t| t.layer == task.layer))
                    .and_then(|t| t.worktree_path.as_ref().map(|p| (p, &t.branch_name)));
                if let Some((path, branch)) = provisioned {
                    lines.push(format!("    - worktree: `{path}`"));
                    lines.push(format!("    - branch: `{branch}`"));
                }
            }
            if (pw.wave_index as usize) < total {
                lines.push(format!(
                    "- wave {} done -> merge -> start wave {}",
                    pw.wave_index,
                    pw.wave_index + 1
                ));
            } else {
                lines.push(format!("- wave {} done -> final merge", pw.wave_index));
            }
            lines.push(String::new());
        }

        lines.push("```text".to_string());
        lines.push("flow: start wave N -> create worktrees -> run in parallel -> merge -> next wave".to_string());
        lines.push("```".to_string());

        if let Some(active) = state.and_then(|s| s.active_wave().map(|w| (s, w.wave_index))) {
            let dispatch = self.build_dispatch(active.0, active.1);
            if !dispatch.is_empty() {
                lines.push(String::new());
                lines.push(dispatch);
            }
        }
        lines.join("\n")
    }
}

fn previous_wave_context(state: &WaveState, wave_index: u32) -> Option<String> {
    if wave_index <= 1 {
        return None;
    }
    let record = state.wave(wave_index - 1)?.cross_validation.as_ref()?;
    if !record.required || record.pairs.is_empty() {
        return None;
    }
    let mut out = format!(
        "> Wave {} output is under cross-validation; expect review feedback on:",
        wave_index - 1
    );
    for pair in &record.pairs {
        out.push_str(&format!("\n> - `{}` reviewed by `{}`", pair.layer, pair.validator));
    }
    Some(out)
}

fn backticked(items: &[String]) -> String {
    items.iter().map(|i| format!("`{i}`")).collect::<Vec<_>>().join(", ")
}

fn summarise(files: &[String]) -> String {
    let shown = backticked(&files[..files.len().min(MAX_LISTED_FILES)]);
    if files.len() > MAX_LISTED_FILES {
        format!("{shown} (+{} more)", files.len() - MAX_LISTED_FILES)
    } else {
        shown
    }
}
