//! Independent review of completed layers for complex features.

use tracing::debug;
use wavesmith_core::types::{CrossValidationRecord, Layer, TaskStatus, ValidationPair, WaveState, WaveTask};

use crate::roster::{implementer, review_checklist, validator};

/// Complexity score at or above which completed layers get a second reviewer.
pub const CROSS_VALIDATION_THRESHOLD: u32 = 50;

/// Fallback reviewer when the table's validator happens to be the implementer.
const FALLBACK_VALIDATOR: &str = "code-reviewer";

pub fn should_cross_validate(complexity_score: Option<u32>, threshold: u32) -> bool {
    complexity_score.is_some_and(|score| score >= threshold)
}

/// One pair per distinct completed layer, in task order.
pub fn build_pairs(tasks: &[WaveTask]) -> Vec<ValidationPair> {
    let mut seen: Vec<Layer> = Vec::new();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .filter(|t| {
            if seen.contains(&t.layer) {
                return false;
            }
            seen.push(t.layer);
            true
        })
        .map(|t| {
            let implemented_by = t.agent_id.clone().unwrap_or_else(|| implementer(t.layer).to_string());
            let mut reviewer = validator(t.layer);
            if reviewer == implemented_by {
                reviewer = FALLBACK_VALIDATOR;
            }
            ValidationPair {
                layer: t.layer,
                implementer: Some(implemented_by),
                validator: reviewer.to_string(),
                file_patterns: t.layer.file_patterns().iter().map(|p| p.to_string()).collect(),
                checklist: review_checklist(t.layer).iter().map(|c| c.to_string()).collect(),
            }
        })
        .collect()
}

/// Decide cross-validation for a wave without touching the state.
pub fn evaluate(state: &WaveState, wave_index: u32, threshold: u32) -> CrossValidationRecord {
    if !should_cross_validate(state.complexity_score, threshold) {
        return CrossValidationRecord::default();
    }
    let Some(wave) = state.wave(wave_index) else {
        return CrossValidationRecord::default();
    };
    let pairs = build_pairs(&wave.tasks);
    CrossValidationRecord {
        required: !pairs.is_empty(),
        pairs,
    }
}

/// Evaluate and store the record on the wave so the next dispatch can cite it.
pub fn attach_cross_validation(state: &mut WaveState, wave_index: u32, threshold: u32) -> CrossValidationRecord {
    let record = evaluate(state, wave_index, threshold);
    if let Some(wave) = state.wave_mut(wave_index) {
        debug!(wave_index, required = record.required, pairs = record.pairs.len(), "cross-validation evaluated");
        wave.cross_validation = Some(record.clone());
    }
    record
}

pub fn build_markdown(pairs: &[ValidationPair], wave_index: u32, feature_slug: Option<&str>) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let slug = feature_slug.filter(|s| !s.is_empty()).unwrap_or("unknown");
    let mut lines = vec![format!("## Wave {wave_index} cross-validation ({slug})"), String::new()];
    for pair in pairs {
        lines.push(format!("### {} -> `{}`", pair.layer, pair.validator));
        lines.push(format!("- **files**: {}", backticked(&pair.file_patterns)));
        if let Some(agent) = &pair.implementer {
            lines.push(format!("- **implemented by**: `{agent}`"));
        }
        lines.push("- **checklist**:".to_string());
        for item in &pair.checklist {
            lines.push(format!("  - [ ] {item}"));
        }
        lines.push("- **report**:".to_string());
        lines.push(format!("  - Reviewed layer: {}", pair.layer));
        lines.push("  - Issues found: (none / list)".to_string());
        lines.push(String::new());
    }
    lines.push("> Validators review only; fixes go back to the implementing agent.".to_string());
    lines.join("\n")
}

/// Same pairs, phrased as a launch instruction for parallel reviewers.
pub fn build_dispatch(pairs: &[ValidationPair], wave_index: u32, feature_slug: Option<&str>) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let mut out = format!(
        "## Cross-validation dispatch\nRun {} cross-validations for wave {wave_index} **in parallel**, one subagent per line:\n",
        pairs.len()
    );
    for pair in pairs {
        out.push_str(&format!("- `{}` reviews `{}`\n", pair.validator, pair.layer));
    }
    out.push('\n');
    out.push_str(&build_markdown(pairs, wave_index, feature_slug));
    out
}

fn backticked(items: &[String]) -> String {
    items.iter().map(|i| format!("`{i}`")).collect::<Vec<_>>().join(", ")
}
