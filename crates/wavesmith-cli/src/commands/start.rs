use anyhow::{bail, Context};
use tracing::warn;
use wavesmith_core::types::{WaveState, WaveStatus};
use wavesmith_core::wave_state::StartOutcome;
use wavesmith_core::worktree_manager::WaveWorkspace;

use super::Project;

/// First wave still waiting to be started.
pub fn next_pending_wave(state: &WaveState) -> Option<u32> {
    state
        .waves
        .iter()
        .find(|w| w.status == WaveStatus::Pending)
        .map(|w| w.wave_index)
}

pub fn run(project: &Project, wave: Option<u32>) -> anyhow::Result<()> {
    let manager = project.worktrees();
    let (state, wave_index) = start(project, wave, &manager)?;
    let dispatch = project.dispatcher().build_dispatch(&state, wave_index);
    println!("{dispatch}");
    Ok(())
}

/// Start `wave` (or the next pending one) and persist the result.
///
/// The wave is claimed and recorded under the team lock; worktrees are
/// provisioned between the two updates. A blocked wave is saved as blocked
/// and reported as an error.
pub fn start(
    project: &Project,
    wave: Option<u32>,
    workspace: &dyn WaveWorkspace,
) -> anyhow::Result<(WaveState, u32)> {
    let request = project.update(|ws| {
        let wave_index = match wave {
            Some(idx) => idx,
            None => next_pending_wave(ws).context("no pending wave to start")?,
        };
        ws.prepare_start(wave_index)
            .with_context(|| format!("wave {wave_index} does not exist or is not pending"))
    })?;
    let wave_index = request.wave_index;

    let provisioned = request.provision(workspace);
    let worktrees = provisioned.as_ref().cloned().unwrap_or_default();

    let applied = project.update(|ws| Ok(ws.apply_start(wave_index, provisioned).map(|o| (o, ws.clone()))))?;
    let Some((outcome, state)) = applied else {
        for wt in &worktrees {
            warn!(path = %wt.path.display(), "wave started elsewhere, provisioned worktree left in place");
        }
        bail!("wave {wave_index} was started by another process");
    };

    match outcome {
        StartOutcome::Started { worktrees } => {
            eprintln!("wave {wave_index}: {} worktree(s) ready", worktrees.len());
            Ok((state, wave_index))
        }
        StartOutcome::Blocked { reason } => bail!("wave {wave_index} blocked: {reason}"),
    }
}
