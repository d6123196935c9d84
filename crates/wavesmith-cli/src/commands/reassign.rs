use anyhow::Context;
use wavesmith_agents::dynamic_scheduler::{reassign_failed_task, Reassignment};
use wavesmith_core::policy::{Policy, PolicyAdvisor};
use wavesmith_core::types::{Layer, TaskStatus, WaveState};

use super::{print_json, Project};

pub fn run(project: &Project, wave: u32, layer: Layer) -> anyhow::Result<()> {
    let policy = project.learner().policy();
    let outcome = reassign(project, wave, layer, policy.as_ref())?;
    print_json(&outcome)
}

/// Agent the retry inherits: its own assignment, else whoever failed the original.
fn current_agent(state: &WaveState, wave: u32, layer: Layer) -> Option<String> {
    let task = state
        .wave(wave)?
        .tasks
        .iter()
        .find(|t| t.layer == layer && t.status == TaskStatus::Pending)?;
    if let Some(agent) = &task.agent_id {
        return Some(agent.clone());
    }
    let origin = state.wave(task.retry_of?)?;
    origin
        .tasks
        .iter()
        .find(|t| t.layer == layer && t.status == TaskStatus::Failed)
        .and_then(|t| t.agent_id.clone())
}

pub fn reassign(project: &Project, wave: u32, layer: Layer, policy: Option<&Policy>) -> anyhow::Result<Reassignment> {
    project.update(|ws| {
        let pending = ws
            .wave(wave)
            .is_some_and(|w| w.tasks.iter().any(|t| t.layer == layer && t.status == TaskStatus::Pending));
        if !pending {
            anyhow::bail!("wave {wave} has no pending {layer} task");
        }
        let current = current_agent(ws, wave, layer);
        let outcome = reassign_failed_task(layer, current.as_deref(), policy);
        if let (true, Some(agent)) = (outcome.reassigned, &outcome.reassigned_agent) {
            ws.assign_agent(wave, layer, agent);
        }
        Ok(outcome)
    })
    .with_context(|| format!("cannot reassign {layer} in wave {wave}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::project;
    use wavesmith_core::policy::AgentPolicy;
    use wavesmith_core::types::WaveTask;
    use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest};

    fn install(p: &Project) {
        let plan = build_wave_plan(
            &[
                vec![TaskRequest::new(Layer::Service, "s")],
                vec![TaskRequest::new(Layer::Controller, "c")],
            ],
            "orders",
        );
        let mut state = WaveState::from_plan(&plan, None);
        let failed = &mut state.wave_mut(1).unwrap().tasks[0];
        failed.status = TaskStatus::Failed;
        failed.agent_id = Some("service-expert".into());
        state.wave_mut(2).unwrap().tasks.push(WaveTask {
            retry_of: Some(1),
            ..WaveTask::pending(Layer::Service, "wave-2/orders/service")
        });
        p.store().init_wave_execution(state).unwrap();
    }

    #[test]
    fn better_agent_is_recorded_on_the_retry() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        install(&p);
        let mut policy = Policy::default();
        policy.agent_policies.insert(
            "api-expert".into(),
            AgentPolicy {
                success_rate: 0.9,
                suggestion: None,
            },
        );

        let outcome = reassign(&p, 2, Layer::Service, Some(&policy)).unwrap();
        assert!(outcome.reassigned);
        assert_eq!(outcome.original_agent.as_deref(), Some("service-expert"));
        assert_eq!(outcome.reassigned_agent.as_deref(), Some("api-expert"));

        let stored = p.require_state().unwrap();
        let retry = stored.wave(2).unwrap().tasks.iter().find(|t| t.layer == Layer::Service).unwrap();
        assert_eq!(retry.agent_id.as_deref(), Some("api-expert"));
    }

    #[test]
    fn missing_retry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        install(&p);
        assert!(reassign(&p, 2, Layer::Entity, None).is_err());
    }
}
