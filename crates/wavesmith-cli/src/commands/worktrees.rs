use super::Project;

pub fn run(project: &Project) -> anyhow::Result<()> {
    let entries = project.worktrees().list_worktrees();
    if entries.is_empty() {
        println!("no worktrees");
        return Ok(());
    }
    for entry in entries {
        let branch = if entry.detached {
            "(detached)".to_string()
        } else if entry.bare {
            "(bare)".to_string()
        } else {
            entry.branch.unwrap_or_default()
        };
        let head: String = entry.head.unwrap_or_default().chars().take(8).collect();
        println!("{:<60} {:<8} {branch}", entry.path, head);
    }
    Ok(())
}
