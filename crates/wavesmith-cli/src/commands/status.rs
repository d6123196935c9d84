use wavesmith_core::types::WaveState;

use super::{print_json, Project};

pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let Some(state) = project.store().load_wave_execution()? else {
        println!("no wave execution");
        return Ok(());
    };
    if json {
        return print_json(&state);
    }
    println!("{}", summary(&state));
    Ok(())
}

pub fn summary(state: &WaveState) -> String {
    let mut lines = vec![
        format!(
            "wavesmith  feature `{}`  {}  (wave {}/{})",
            state.feature_slug, state.status, state.current_wave, state.total_waves
        ),
        "-".repeat(48),
    ];
    for wave in &state.waves {
        lines.push(format!("Wave {:<3} {}", wave.wave_index, wave.status));
        for task in &wave.tasks {
            let mut line = format!("  {:<11} {:<12}", task.layer.as_str(), task.status.to_string());
            if let Some(agent) = &task.agent_id {
                line.push_str(&format!(" {agent}"));
            }
            if let Some(origin) = task.retry_of {
                line.push_str(&format!(" (retry of wave {origin})"));
            }
            if let Some(class) = task.failure_class {
                line.push_str(&format!(" [{class}]"));
            }
            lines.push(line.trim_end().to_string());
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavesmith_core::types::{FailureClass, Layer, TaskStatus};
    use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest};

    #[test]
    fn summary_lists_waves_and_failures() {
        let plan = build_wave_plan(&[vec![TaskRequest::new(Layer::Entity, "e")]], "orders");
        let mut state = WaveState::from_plan(&plan, None);
        let task = &mut state.wave_mut(1).unwrap().tasks[0];
        task.status = TaskStatus::Failed;
        task.failure_class = Some(FailureClass::VerifyFail);

        let out = summary(&state);
        assert!(out.contains("feature `orders`  pending  (wave 0/1)"));
        assert!(out.contains("Wave 1   pending"));
        assert!(out.contains("entity      failed       [verify_fail]"));
    }
}
