use super::{print_json, Project};

pub fn rebuild(project: &Project) -> anyhow::Result<()> {
    match project.learner().rebuild()? {
        Some(policy) => print_json(&policy),
        None => {
            println!(
                "not enough runs yet (need {})",
                project.config.metrics.min_runs_for_policy
            );
            Ok(())
        }
    }
}

pub fn show(project: &Project) -> anyhow::Result<()> {
    print_json(&project.learner().load_policy()?)
}

pub fn suggest(project: &Project) -> anyhow::Result<()> {
    let suggestions = project.learner().suggestions()?;
    if suggestions.is_empty() {
        println!("no suggestions");
        return Ok(());
    }
    for s in suggestions {
        match &s.target {
            Some(target) => println!("[{}] {target}: {}", s.kind.as_str(), s.message),
            None => println!("[{}] {}", s.kind.as_str(), s.message),
        }
    }
    Ok(())
}
