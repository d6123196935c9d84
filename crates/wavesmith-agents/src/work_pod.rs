use wavesmith_core::types::{Layer, ProjectLevel};

use crate::roster::{pod_roles, pods_enabled, PodRoles};

/// Maximum implement/verify cycles before a worker stops and reports.
pub const MAX_VERIFY_ATTEMPTS: u32 = 3;

/// Pod for a task, or `None` when the level works without pods.
pub fn resolve_pod(layer: Layer, level: ProjectLevel) -> Option<PodRoles> {
    pods_enabled(level).then(|| pod_roles(layer))
}

/// Markdown block describing the Navigator -> Dev -> Executor -> QA loop.
pub fn build_pod_protocol(layer: Layer, level: ProjectLevel, verify_command: Option<&str>) -> Option<String> {
    let pod = resolve_pod(layer, level)?;

    let mut lines = vec![
        "#### Work Pod Protocol".to_string(),
        "| Role | Agent | Step |".to_string(),
        "|------|-------|------|".to_string(),
        format!("| Navigator | `{}` | 1. review the design before coding |", pod.navigator),
        format!("| Dev | `{}` | 2. implement |", pod.dev),
        format!("| Executor | `{}` | 3. build and test |", pod.executor),
        format!("| QA | `{}` | 4. code review |", pod.qa),
        String::new(),
        "Step 1 - Navigator: confirm intent and interfaces; check naming, dependencies and package layout".to_string(),
        "Step 2 - Dev: implement inside OWN FILES only, following the Step 1 guidance".to_string(),
    ];
    lines.push(match verify_command {
        Some(cmd) => format!(
            "Step 3 - Executor: run `{cmd}`; on failure go back to Step 2 (max {MAX_VERIFY_ATTEMPTS} attempts)"
        ),
        None => format!(
            "Step 3 - Executor: verify manually; on failure go back to Step 2 (max {MAX_VERIFY_ATTEMPTS} attempts)"
        ),
    });
    lines.push("Step 4 - QA: check quality and OWN FILES violations; send fixes back to Step 2".to_string());
    Some(lines.join("\n"))
}
