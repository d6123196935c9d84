use crate::types::{FailureClass, WaveTask};
use crate::wave_state::FinalizeReport;

/// Map a failed task onto the stable failure taxonomy.
///
/// Verify failures win over merge conflicts; anything the merge step did not
/// report is attributed to the agent.
pub fn classify_failure(task: &WaveTask, report: Option<&FinalizeReport>) -> FailureClass {
    let Some(report) = report else {
        return FailureClass::AgentError;
    };
    if report.verify_failed.contains(&task.layer) {
        return FailureClass::VerifyFail;
    }
    let conflicted = report
        .results
        .iter()
        .any(|r| r.layer == task.layer && r.outcome.conflicts());
    if conflicted {
        return FailureClass::MergeConflict;
    }
    FailureClass::AgentError
}
