//! Wave/task state machine.
//!
//! Task lifecycle: `pending -> in_progress -> completed | failed`.
//! Wave lifecycle: `pending -> in_progress -> completed`, or `pending ->
//! blocked` when provisioning yields no usable worktree. A blocked wave is
//! never retried automatically.
//!
//! Side effects (worktrees, verification, merging) go through the
//! [`WaveWorkspace`] handed in by the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{
    wave_branch_name, FailureClass, Layer, RunStatus, TaskStatus, Wave, WaveState, WaveStatus, WaveTask,
};
use crate::wave_plan::WavePlan;
use crate::worktree_manager::{LayerMergeResult, WaveMergeSummary, WaveWorkspace, WaveWorktree};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of completing or failing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTransition {
    /// `true` only for the call that moved the wave to `completed`.
    pub wave_completed: bool,
    pub all_waves_completed: bool,
    /// Wave the caller should provision next.
    pub next_wave_index: Option<u32>,
    pub failed_layers: Vec<Layer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { worktrees: Vec<WaveWorktree> },
    Blocked { reason: String },
}

/// What happened when a completed wave was verified and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReport {
    pub wave_index: u32,
    pub merged_count: usize,
    pub conflict_count: usize,
    pub verify_failed: Vec<Layer>,
    pub verify_failed_count: usize,
    pub results: Vec<LayerMergeResult>,
    /// No worktree was left to merge.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleOutcome {
    pub rescheduled: Vec<Layer>,
    pub target_wave_index: Option<u32>,
}

// ---------------------------------------------------------------------------
// Side-effect phases
// ---------------------------------------------------------------------------

/// Layers of a pending wave waiting to be provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub wave_index: u32,
    pub feature_slug: String,
    pub layers: Vec<Layer>,
}

impl StartRequest {
    /// Create the wave's worktrees. An empty result counts as a failure.
    pub fn provision(&self, workspace: &dyn WaveWorkspace) -> std::result::Result<Vec<WaveWorktree>, String> {
        if self.layers.is_empty() {
            return Err("wave has no layers".to_string());
        }
        match workspace.provision(self.wave_index, &self.feature_slug, &self.layers) {
            Ok(worktrees) if worktrees.is_empty() => Err("provisioning produced no worktrees".to_string()),
            Ok(worktrees) => Ok(worktrees),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Worktrees of a completed wave waiting to be verified and merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub wave_index: u32,
    pub worktrees: Vec<WaveWorktree>,
}

/// Raw verify and merge results, not yet applied to any state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeWork {
    pub wave_index: u32,
    pub processed: Vec<WaveWorktree>,
    pub verify_failed: Vec<Layer>,
    pub summary: WaveMergeSummary,
}

impl FinalizeRequest {
    /// Verify every worktree, then merge the ones that passed.
    pub fn execute(
        &self,
        workspace: &dyn WaveWorkspace,
        verify_command: Option<&str>,
        target: Option<&str>,
    ) -> FinalizeWork {
        let mut verify_failed = Vec::new();
        let mut to_merge = Vec::new();
        for wt in &self.worktrees {
            if workspace.verify(wt, verify_command).passed {
                to_merge.push(wt.clone());
            } else {
                warn!(wave_index = self.wave_index, layer = %wt.layer, "verification failed, keeping worktree");
                verify_failed.push(wt.layer);
            }
        }

        let summary = if to_merge.is_empty() {
            WaveMergeSummary::default()
        } else {
            workspace.merge_and_cleanup(&to_merge, target)
        };
        FinalizeWork {
            wave_index: self.wave_index,
            processed: self.worktrees.clone(),
            verify_failed,
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// WaveState operations
// ---------------------------------------------------------------------------

impl WaveState {
    /// Materialise a plan into pending waves.
    pub fn from_plan(plan: &WavePlan, complexity_score: Option<u32>) -> Self {
        let slug = plan.feature_slug.as_str();
        let waves: Vec<Wave> = plan
            .waves
            .iter()
            .map(|pw| Wave {
                wave_index: pw.wave_index,
                status: WaveStatus::Pending,
                tasks: pw
                    .tasks
                    .iter()
                    .map(|pt| WaveTask {
                        title: pt.title.clone(),
                        owner: pt.owner.clone(),
                        ..WaveTask::pending(pt.layer, wave_branch_name(pw.wave_index, slug, pt.layer))
                    })
                    .collect(),
                cross_validation: None,
            })
            .collect();

        Self {
            feature_slug: plan.feature_slug.clone(),
            current_wave: 0,
            total_waves: waves.len() as u32,
            status: RunStatus::Pending,
            complexity_score,
            waves,
        }
    }

    /// Provision and start a pending wave.
    ///
    /// Returns `None` if the wave does not exist or is not pending. Callers
    /// that persist state across processes should use [`WaveState::prepare_start`]
    /// and [`WaveState::apply_start`] so provisioning runs outside any lock.
    pub fn start_wave(&mut self, wave_index: u32, workspace: &dyn WaveWorkspace) -> Option<StartOutcome> {
        let request = self.prepare_start(wave_index)?;
        let provisioned = request.provision(workspace);
        self.apply_start(wave_index, provisioned)
    }

    /// What provisioning a pending wave needs. `None` unless the wave is pending.
    pub fn prepare_start(&self, wave_index: u32) -> Option<StartRequest> {
        let wave = self.wave(wave_index)?;
        if wave.status != WaveStatus::Pending {
            debug!(wave_index, status = %wave.status, "wave not startable");
            return None;
        }
        Some(StartRequest {
            wave_index,
            feature_slug: self.feature_slug.clone(),
            layers: wave.layers(),
        })
    }

    /// Record the result of provisioning on the wave.
    ///
    /// Returns `None` if the wave is no longer pending, e.g. another process
    /// started it in the meantime.
    pub fn apply_start(
        &mut self,
        wave_index: u32,
        provisioned: std::result::Result<Vec<WaveWorktree>, String>,
    ) -> Option<StartOutcome> {
        let wave = self.wave_mut(wave_index)?;
        if wave.status != WaveStatus::Pending {
            warn!(wave_index, status = %wave.status, "wave changed while provisioning");
            return None;
        }

        let worktrees = match provisioned {
            Ok(worktrees) => worktrees,
            Err(reason) => {
                warn!(wave_index, reason = %reason, "wave blocked");
                wave.status = WaveStatus::Blocked;
                return Some(StartOutcome::Blocked { reason });
            }
        };

        let now = Utc::now();
        wave.status = WaveStatus::InProgress;
        for task in &mut wave.tasks {
            if let Some(wt) = worktrees.iter().find(|wt| wt.layer == task.layer) {
                task.worktree_path = Some(wt.path.display().to_string());
                task.branch_name = wt.branch.clone();
            }
            if task.status.can_transition_to(&TaskStatus::InProgress) {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(now);
            }
            if task.agent_id.is_none() {
                task.agent_id = Some(task.layer.default_agent().to_string());
            }
        }

        self.current_wave = wave_index;
        self.status = RunStatus::InProgress;
        info!(wave_index, worktrees = worktrees.len(), "wave started");
        Some(StartOutcome::Started { worktrees })
    }

    /// Report a task as completed.
    pub fn complete_task(&mut self, wave_index: u32, layer: Layer) -> TaskTransition {
        self.transition_task(wave_index, layer, TaskStatus::Completed)
    }

    /// Report a task as failed. Agent-reported failures classify as `agent_error`.
    pub fn fail_task(&mut self, wave_index: u32, layer: Layer) -> TaskTransition {
        self.transition_task(wave_index, layer, TaskStatus::Failed)
    }

    fn transition_task(&mut self, wave_index: u32, layer: Layer, target: TaskStatus) -> TaskTransition {
        let mut wave_completed = false;

        if let Some(wave) = self.wave_mut(wave_index) {
            if wave.status == WaveStatus::Completed {
                debug!(wave_index, layer = %layer, "wave already completed, ignoring");
            } else if let Some(task) = wave
                .tasks
                .iter_mut()
                .find(|t| t.layer == layer && !t.status.is_terminal())
            {
                if task.status.can_transition_to(&target) {
                    debug!(wave_index, layer = %layer, from = %task.status, to = %target, "task transition");
                    task.status = target;
                    task.completed_at = Some(Utc::now());
                    if target == TaskStatus::Failed {
                        task.failure_class = Some(FailureClass::AgentError);
                    }
                    if wave.all_tasks_terminal() {
                        wave.status = WaveStatus::Completed;
                        wave_completed = true;
                        info!(wave_index, failed = wave.failed_layers().len(), "wave completed");
                    }
                } else {
                    warn!(wave_index, layer = %layer, from = %task.status, to = %target, "invalid task transition ignored");
                }
            } else {
                debug!(wave_index, layer = %layer, "no open task for layer");
            }
        }

        if wave_completed && self.all_waves_completed() {
            self.status = RunStatus::Completed;
            info!(feature = %self.feature_slug, "all waves completed");
        }

        let next_wave_index = (wave_completed && self.wave(wave_index + 1).is_some()).then_some(wave_index + 1);
        TaskTransition {
            wave_completed,
            all_waves_completed: self.all_waves_completed(),
            next_wave_index,
            failed_layers: self.wave(wave_index).map(Wave::failed_layers).unwrap_or_default(),
        }
    }

    /// Verify and merge a completed wave.
    ///
    /// Completed tasks whose worktree fails verification are kept out of the
    /// merge and keep their worktree. Verify failures and merge conflicts are
    /// re-graded to `failed` with the matching failure class so they can be
    /// rescheduled. Returns `None` unless the wave is completed.
    pub fn finalize_wave(
        &mut self,
        wave_index: u32,
        workspace: &dyn WaveWorkspace,
        verify_command: Option<&str>,
        target: Option<&str>,
    ) -> Option<FinalizeReport> {
        let request = self.prepare_finalize(wave_index)?;
        let work = request.execute(workspace, verify_command, target);
        self.apply_finalize(&work)
    }

    /// Worktrees of a completed wave that still need verifying and merging.
    pub fn prepare_finalize(&self, wave_index: u32) -> Option<FinalizeRequest> {
        let wave = self.wave(wave_index)?;
        if wave.status != WaveStatus::Completed {
            debug!(wave_index, status = %wave.status, "finalize skipped, wave not completed");
            return None;
        }

        let worktrees = wave
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| {
                t.worktree_path.as_ref().map(|path| WaveWorktree {
                    layer: t.layer,
                    path: path.into(),
                    branch: t.branch_name.clone(),
                })
            })
            .collect();
        Some(FinalizeRequest { wave_index, worktrees })
    }

    /// Re-grade the wave's tasks from the verify and merge results.
    ///
    /// Only tasks that are still `completed` on the worktree that was
    /// processed are touched, so changes made meanwhile survive.
    pub fn apply_finalize(&mut self, work: &FinalizeWork) -> Option<FinalizeReport> {
        let wave_index = work.wave_index;
        let wave = self.wave_mut(wave_index)?;
        for task in wave.tasks.iter_mut().filter(|t| t.status == TaskStatus::Completed) {
            let processed = work
                .processed
                .iter()
                .any(|wt| wt.layer == task.layer && task.worktree_path.as_deref() == wt.path.to_str());
            if !processed {
                continue;
            }
            if work.verify_failed.contains(&task.layer) {
                task.status = TaskStatus::Failed;
                task.failure_class = Some(FailureClass::VerifyFail);
                continue;
            }
            let Some(result) = work.summary.results.iter().find(|r| r.layer == task.layer) else {
                continue;
            };
            if result.outcome.conflicts() {
                task.status = TaskStatus::Failed;
                task.failure_class = Some(FailureClass::MergeConflict);
            }
            if result.removed {
                task.worktree_path = None;
            }
        }

        Some(FinalizeReport {
            wave_index,
            merged_count: work.summary.merged_count,
            conflict_count: work.summary.conflict_count,
            verify_failed: work.verify_failed.clone(),
            verify_failed_count: work.verify_failed.len(),
            skipped: work.processed.len() == work.verify_failed.len(),
            results: work.summary.results.clone(),
        })
    }

    /// Move never-retried failures of `completed_wave` into the next wave.
    ///
    /// The next wave is created when missing. A layer already present in the
    /// target wave is not added twice, and a task that is itself a retry is
    /// never rescheduled again.
    pub fn reschedule_failed_tasks(&mut self, completed_wave: u32) -> RescheduleOutcome {
        let target_index = completed_wave + 1;
        let Some(source) = self.wave(completed_wave) else {
            return RescheduleOutcome::default();
        };

        let candidates: Vec<(Layer, String, Option<String>)> = source
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed && t.retry_of.is_none())
            .map(|t| (t.layer, t.title.clone(), t.owner.clone()))
            .collect();

        let to_add: Vec<(Layer, String, Option<String>)> = match self.wave(target_index) {
            Some(target) if target.status != WaveStatus::Pending => {
                warn!(target_index, status = %target.status, "next wave already started, not rescheduling");
                return RescheduleOutcome::default();
            }
            Some(target) => candidates
                .into_iter()
                .filter(|(layer, _, _)| !target.contains_layer(*layer))
                .collect(),
            None => candidates,
        };
        let mut seen = Vec::new();
        let to_add: Vec<_> = to_add
            .into_iter()
            .filter(|(layer, _, _)| {
                let fresh = !seen.contains(layer);
                seen.push(*layer);
                fresh
            })
            .collect();
        if to_add.is_empty() {
            return RescheduleOutcome::default();
        }

        if self.wave(target_index).is_none() {
            self.waves.push(Wave::new(target_index));
            self.total_waves = self.waves.len() as u32;
            if self.status == RunStatus::Completed {
                self.status = RunStatus::InProgress;
            }
            info!(target_index, "created wave for retries");
        }

        let slug = self.feature_slug.clone();
        let mut rescheduled = Vec::with_capacity(to_add.len());
        if let Some(target) = self.wave_mut(target_index) {
            for (layer, title, owner) in to_add {
                target.tasks.push(WaveTask {
                    title,
                    owner,
                    retry_of: Some(completed_wave),
                    ..WaveTask::pending(layer, wave_branch_name(target_index, &slug, layer))
                });
                rescheduled.push(layer);
            }
        }
        info!(from = completed_wave, to = target_index, layers = ?rescheduled, "rescheduled failed tasks");
        RescheduleOutcome {
            rescheduled,
            target_wave_index: Some(target_index),
        }
    }

    /// Record the agent chosen for a pending task. Returns `false` if no such task.
    pub fn assign_agent(&mut self, wave_index: u32, layer: Layer, agent: &str) -> bool {
        let Some(task) = self
            .wave_mut(wave_index)
            .and_then(|w| w.tasks.iter_mut().find(|t| t.layer == layer && t.status == TaskStatus::Pending))
        else {
            return false;
        };
        task.agent_id = Some(agent.to_string());
        true
    }
}
