use chrono::Utc;
use tracing::warn;
use wavesmith_intelligence::{build_run_metrics, RunMetrics};

use super::{print_json, Project};

pub fn run(project: &Project, clear: bool) -> anyhow::Result<()> {
    let run = record(project, clear)?;
    print_json(&run.summary)
}

/// Append the current run to the metrics history, relearn the policy and
/// optionally drop the wave execution. An execution is appended only once.
pub fn record(project: &Project, clear: bool) -> anyhow::Result<RunMetrics> {
    let state = project.require_state()?;
    if !state.all_waves_completed() {
        warn!(feature = %state.feature_slug, status = %state.status, "recording an unfinished run");
    }

    let run = build_run_metrics(&state, None, Utc::now());
    let learner = project.learner();
    match learner.metrics().append_new(run.clone())? {
        Some(retained) => {
            eprintln!("recorded run {} ({retained} run(s) in history)", run.run_id);
            match learner.rebuild()? {
                Some(policy) => eprintln!(
                    "policy rebuilt: {} layer(s), {} agent(s)",
                    policy.layer_policies.len(),
                    policy.agent_policies.len()
                ),
                None => eprintln!(
                    "policy unchanged: needs {} run(s)",
                    project.config.metrics.min_runs_for_policy
                ),
            }
        }
        None => eprintln!("`{}` is already in the metrics history; nothing appended", state.feature_slug),
    }

    if clear {
        project.store().clear_wave_execution()?;
    }
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::project;
    use wavesmith_core::types::{Layer, RunStatus, TaskStatus, WaveState, WaveStatus};
    use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest};

    #[test]
    fn record_appends_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        let plan = build_wave_plan(&[vec![TaskRequest::new(Layer::Entity, "e")]], "orders");
        let mut state = WaveState::from_plan(&plan, None);
        state.status = RunStatus::Completed;
        let wave = state.wave_mut(1).unwrap();
        wave.status = WaveStatus::Completed;
        wave.tasks[0].status = TaskStatus::Completed;
        p.store().init_wave_execution(state).unwrap();

        let run = record(&p, true).unwrap();
        assert_eq!(run.summary.completed_tasks, 1);
        assert_eq!(p.learner().metrics().load().unwrap().runs.len(), 1);
        assert!(p.store().load_wave_execution().unwrap().is_none());
        assert!(!p.paths.policy().exists());
    }

    #[test]
    fn recording_twice_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        let plan = build_wave_plan(&[vec![TaskRequest::new(Layer::Entity, "e")]], "orders");
        let mut state = WaveState::from_plan(&plan, None);
        state.status = RunStatus::Completed;
        let wave = state.wave_mut(1).unwrap();
        wave.status = WaveStatus::Completed;
        wave.tasks[0].status = TaskStatus::Completed;
        wave.tasks[0].completed_at = Some(Utc::now());
        p.store().init_wave_execution(state).unwrap();

        record(&p, false).unwrap();
        record(&p, false).unwrap();
        assert_eq!(p.learner().metrics().load().unwrap().runs.len(), 1);
        assert!(p.store().load_wave_execution().unwrap().is_some());
    }
}
