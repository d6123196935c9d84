use anyhow::Context;
use wavesmith_core::wave_plan::{PlannedTask, PlannedWave, WavePlan};
use wavesmith_core::types::WaveState;

use super::Project;

pub fn run(project: &Project, wave: Option<u32>, whole_plan: bool) -> anyhow::Result<()> {
    let state = project.require_state()?;
    let dispatcher = project.dispatcher();

    if whole_plan {
        println!("{}", dispatcher.build_execution_markdown(&plan_of(&state), Some(&state)));
        return Ok(());
    }

    let wave_index = match wave {
        Some(idx) => idx,
        None => state
            .active_wave()
            .map(|w| w.wave_index)
            .context("no wave in progress; start one with `wavesmith start`")?,
    };
    let out = dispatcher.build_dispatch(&state, wave_index);
    if out.is_empty() {
        eprintln!("wave {wave_index} has nothing to dispatch");
    } else {
        println!("{out}");
    }
    Ok(())
}

/// Plan view of a stored execution, including waves added by rescheduling.
pub fn plan_of(state: &WaveState) -> WavePlan {
    WavePlan {
        feature_slug: state.feature_slug.clone(),
        waves: state
            .waves
            .iter()
            .map(|w| PlannedWave {
                wave_index: w.wave_index,
                layers: w.layers(),
                tasks: w
                    .tasks
                    .iter()
                    .map(|t| PlannedTask {
                        layer: t.layer,
                        title: t.title.clone(),
                        owner: t.owner.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}
