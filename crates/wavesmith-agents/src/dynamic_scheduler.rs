//! Failure recovery: alternate agent selection and helper spawn payloads.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wavesmith_core::policy::Policy;
use wavesmith_core::types::{FailureClass, Layer, TaskStatus, WaveState, WaveTask};

use crate::ownership::own_patterns;
use crate::roster::implementer;

/// Alternates must beat this success rate to be considered.
pub const MIN_ALTERNATE_SUCCESS_RATE: f64 = 0.5;

/// Best alternate for a failed layer, or `None` if only the failing agent qualifies.
///
/// Learned agents above [`MIN_ALTERNATE_SUCCESS_RATE`] are preferred, highest
/// success rate first; the static default for the layer is the fallback.
pub fn resolve_alternate_agent(layer: Layer, current_agent: Option<&str>, policy: Option<&Policy>) -> Option<String> {
    let mut candidates: Vec<(&str, f64)> = policy
        .map(|p| {
            p.agent_policies
                .iter()
                .filter(|(name, ap)| Some(name.as_str()) != current_agent && ap.success_rate > MIN_ALTERNATE_SUCCESS_RATE)
                .map(|(name, ap)| (name.as_str(), ap.success_rate))
                .collect()
        })
        .unwrap_or_default();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    if let Some((name, rate)) = candidates.first() {
        debug!(layer = %layer, agent = name, success_rate = rate, "alternate from policy");
        return Some(name.to_string());
    }
    let fallback = implementer(layer);
    (Some(fallback) != current_agent).then(|| fallback.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reassignment {
    pub layer: Layer,
    pub original_agent: Option<String>,
    pub reassigned_agent: Option<String>,
    pub reassigned: bool,
    pub reason: String,
}

/// Pick a new agent for a failed task.
///
/// With no viable alternate the task keeps its agent and nothing else is
/// attempted; the caller decides what to do next.
pub fn reassign_failed_task(layer: Layer, current_agent: Option<&str>, policy: Option<&Policy>) -> Reassignment {
    match resolve_alternate_agent(layer, current_agent, policy) {
        Some(agent) => {
            info!(layer = %layer, from = ?current_agent, to = %agent, "reassigning failed task");
            Reassignment {
                layer,
                original_agent: current_agent.map(String::from),
                reason: format!("{} failed on {layer}; switching to {agent}", current_agent.unwrap_or("unassigned agent")),
                reassigned_agent: Some(agent),
                reassigned: true,
            }
        }
        None => Reassignment {
            layer,
            original_agent: current_agent.map(String::from),
            reassigned_agent: current_agent.map(String::from),
            reassigned: false,
            reason: format!("no alternate agent available for {layer}"),
        },
    }
}

pub fn suggested_approach(failure: Option<FailureClass>) -> &'static str {
    match failure {
        Some(FailureClass::VerifyFail) => "analyse the failing tests, fix the implementation, then rerun verification",
        Some(FailureClass::MergeConflict) => "resolve the conflicting files against the target branch, then merge again",
        Some(FailureClass::AgentError) => "check the agent environment and inputs, then retry the task",
        None => "analyse the cause of the failure, then retry",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureContext {
    pub error_details: Option<String>,
    pub failure_class: Option<FailureClass>,
}

/// Everything an external helper needs to pick up a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnHelperPayload {
    pub target_layer: Layer,
    pub worktree_path: Option<String>,
    pub branch_name: String,
    pub wave_index: u32,
    pub failure_context: FailureContext,
    pub suggested_approach: String,
    pub own_files: Vec<String>,
    pub spawn_agent: Option<String>,
    pub feature_slug: String,
}

pub fn build_spawn_helper_payload(
    task: &WaveTask,
    wave_index: u32,
    feature_slug: &str,
    error_details: Option<&str>,
    policy: Option<&Policy>,
) -> SpawnHelperPayload {
    SpawnHelperPayload {
        target_layer: task.layer,
        worktree_path: task.worktree_path.clone(),
        branch_name: task.branch_name.clone(),
        wave_index,
        failure_context: FailureContext {
            error_details: error_details.map(String::from),
            failure_class: task.failure_class,
        },
        suggested_approach: suggested_approach(task.failure_class).to_string(),
        own_files: own_patterns(task.layer),
        spawn_agent: resolve_alternate_agent(task.layer, task.agent_id.as_deref(), policy),
        feature_slug: feature_slug.to_string(),
    }
}

/// `layer → agent` lines for the failed tasks of a wave, if any.
pub fn build_helper_spawn_hint(state: &WaveState, wave_index: u32) -> Option<String> {
    let wave = state.wave(wave_index)?;
    let lines: Vec<String> = wave
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .map(|t| format!("- {} → {}", t.layer, implementer(t.layer)))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!(
        "Failed tasks in wave {wave_index} can be handed to a helper:\n{}",
        lines.join("\n")
    ))
}
