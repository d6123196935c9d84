use anyhow::Context;
use serde::Serialize;
use wavesmith_agents::cross_validator::{attach_cross_validation, build_dispatch, build_markdown};
use wavesmith_core::types::{CrossValidationRecord, WaveState};
use wavesmith_core::wave_state::{FinalizeReport, RescheduleOutcome};
use wavesmith_core::worktree_manager::WaveWorkspace;

use super::{print_json, Project};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeSummary {
    pub report: FinalizeReport,
    pub reschedule: Option<RescheduleOutcome>,
    pub cross_validation: CrossValidationRecord,
    pub all_waves_completed: bool,
}

pub fn run(project: &Project, wave: u32, reschedule: bool) -> anyhow::Result<()> {
    let manager = project.worktrees();
    let (summary, state) = finalize(project, wave, reschedule, &manager)?;
    print_json(&summary)?;

    let pairs = &summary.cross_validation.pairs;
    if summary.cross_validation.required {
        println!("{}", build_markdown(pairs, wave, Some(&state.feature_slug)));
        println!("{}", build_dispatch(pairs, wave, Some(&state.feature_slug)));
    }
    if let Some(next) = summary.reschedule.as_ref().and_then(|r| r.target_wave_index) {
        eprintln!("failed tasks moved to wave {next}; start it with `wavesmith start --wave {next}`");
    } else if summary.all_waves_completed {
        eprintln!("run finished; `wavesmith record` captures its metrics");
    }
    Ok(())
}

/// Verify and merge `wave`, reschedule its failures, and evaluate cross-validation.
///
/// Verify and merge run outside the team lock; their results are applied to
/// a freshly loaded state so concurrent task callbacks are not lost.
pub fn finalize(
    project: &Project,
    wave: u32,
    reschedule: bool,
    workspace: &dyn WaveWorkspace,
) -> anyhow::Result<(FinalizeSummary, WaveState)> {
    let verify = project.verify_command();
    let target = project.config.general.target_branch.clone();
    let threshold = project.config.cross_validation.threshold;

    let request = project.update(|ws| {
        ws.prepare_finalize(wave)
            .with_context(|| format!("wave {wave} is not completed"))
    })?;
    let work = request.execute(workspace, verify.as_deref(), target.as_deref());

    project.update(|ws| {
        let report = ws
            .apply_finalize(&work)
            .with_context(|| format!("wave {wave} disappeared while merging"))?;
        let reschedule = reschedule.then(|| ws.reschedule_failed_tasks(wave));
        let cross_validation = attach_cross_validation(ws, wave, threshold);
        let summary = FinalizeSummary {
            report,
            reschedule,
            cross_validation,
            all_waves_completed: ws.all_waves_completed(),
        };
        Ok((summary, ws.clone()))
    })
}

pub fn reschedule(project: &Project, wave: u32) -> anyhow::Result<()> {
    let outcome = project.update(|ws| Ok(ws.reschedule_failed_tasks(wave)))?;
    print_json(&outcome)
}
