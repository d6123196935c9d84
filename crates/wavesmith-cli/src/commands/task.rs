use wavesmith_agents::dynamic_scheduler::{build_helper_spawn_hint, build_spawn_helper_payload};
use wavesmith_core::policy::PolicyAdvisor;
use wavesmith_core::types::{Layer, TaskStatus};
use wavesmith_core::wave_state::TaskTransition;

use super::{print_json, Project};

pub fn complete(project: &Project, wave: u32, layer: Layer) -> anyhow::Result<()> {
    let transition = project.update(|ws| Ok(ws.complete_task(wave, layer)))?;
    report(&transition, wave);
    print_json(&transition)
}

pub fn fail(project: &Project, wave: u32, layer: Layer, error: Option<&str>) -> anyhow::Result<()> {
    let (transition, state) = project.update(|ws| Ok((ws.fail_task(wave, layer), ws.clone())))?;
    report(&transition, wave);
    print_json(&transition)?;

    let failed = state
        .wave(wave)
        .and_then(|w| w.tasks.iter().find(|t| t.layer == layer && t.status == TaskStatus::Failed));
    if let Some(task) = failed {
        let policy = project.learner().policy();
        let payload = build_spawn_helper_payload(task, wave, &state.feature_slug, error, policy.as_ref());
        print_json(&payload)?;
    }
    if let Some(hint) = build_helper_spawn_hint(&state, wave) {
        println!("{hint}");
    }
    Ok(())
}

fn report(transition: &TaskTransition, wave: u32) {
    if transition.wave_completed {
        eprintln!("wave {wave} completed; next: `wavesmith finalize --wave {wave}`");
    }
    if transition.all_waves_completed {
        eprintln!("all waves completed; `wavesmith record` captures the run");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::project;
    use wavesmith_core::types::{WaveState, WaveStatus};
    use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest};

    #[test]
    fn callbacks_update_the_stored_state() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        let plan = build_wave_plan(
            &[vec![TaskRequest::new(Layer::Entity, "e"), TaskRequest::new(Layer::Dto, "d")]],
            "orders",
        );
        let mut state = WaveState::from_plan(&plan, None);
        let wave = state.wave_mut(1).unwrap();
        wave.status = WaveStatus::InProgress;
        for t in &mut wave.tasks {
            t.status = TaskStatus::InProgress;
        }
        p.store().init_wave_execution(state).unwrap();

        complete(&p, 1, Layer::Entity).unwrap();
        fail(&p, 1, Layer::Dto, Some("compile error")).unwrap();

        let stored = p.require_state().unwrap();
        let w = stored.wave(1).unwrap();
        assert_eq!(w.status, WaveStatus::Completed);
        assert_eq!(w.failed_layers(), vec![Layer::Dto]);
    }

    #[test]
    fn callbacks_without_execution_fail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(complete(&project(&dir), 1, Layer::Entity).is_err());
    }
}
