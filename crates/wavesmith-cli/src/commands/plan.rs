use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::info;
use wavesmith_agents::dispatcher::WaveDispatcher;
use wavesmith_core::policy::NoPolicy;
use wavesmith_core::types::{Layer, ProjectLevel, RunStatus, WaveState};
use wavesmith_core::wave_plan::{assign_owners, build_wave_plan, group_by_dependency, TaskRequest};

use super::Project;

pub struct PlanRequest {
    pub feature: String,
    pub tasks: Vec<String>,
    pub groups: Option<PathBuf>,
    pub members: Vec<String>,
    pub complexity: Option<u32>,
    pub level: Option<ProjectLevel>,
    pub force: bool,
}

/// Parse `layer[:title]`. The title defaults to the layer name.
pub fn parse_task(spec: &str) -> anyhow::Result<TaskRequest> {
    let (layer, title) = match spec.split_once(':') {
        Some((layer, title)) => (layer, title.trim()),
        None => (spec, ""),
    };
    let layer: Layer = layer.parse()?;
    let title = if title.is_empty() { layer.as_str() } else { title };
    Ok(TaskRequest::new(layer, title))
}

fn load_groups(path: &Path) -> anyhow::Result<Vec<Vec<TaskRequest>>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a list of task groups", path.display()))
}

pub fn run(project: &Project, request: PlanRequest) -> anyhow::Result<()> {
    let markdown = plan(project, request)?;
    println!("{markdown}");
    Ok(())
}

/// Build, validate and install the plan; returns the execution-plan Markdown.
pub fn plan(project: &Project, request: PlanRequest) -> anyhow::Result<String> {
    let store = project.store();
    if let Some(existing) = store.load_wave_execution()? {
        if existing.status != RunStatus::Completed && !request.force {
            bail!(
                "wave execution for `{}` is still {}; pass --force to replace it",
                existing.feature_slug,
                existing.status
            );
        }
    }

    let groups = match &request.groups {
        Some(path) => load_groups(path)?,
        None => {
            if request.tasks.is_empty() {
                bail!("nothing to plan; pass --task or --groups");
            }
            let tasks = request
                .tasks
                .iter()
                .map(|spec| parse_task(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let level = request.level.unwrap_or(project.config.general.level);
            group_by_dependency(&tasks, project.config.team.wave_width(level))
        }
    };
    let groups: Vec<Vec<TaskRequest>> = if request.members.is_empty() {
        groups
    } else {
        groups.iter().map(|g| assign_owners(g, &request.members)).collect()
    };

    let plan = build_wave_plan(&groups, &request.feature);
    if request.groups.is_some() {
        if let Err(e) = plan.validate() {
            bail!("invalid task groups: {e}");
        }
    } else if plan.is_empty() {
        bail!("no task carried a known layer");
    }

    let state = WaveState::from_plan(&plan, request.complexity);
    store.init_wave_execution(state.clone())?;
    info!(feature = %plan.feature_slug, waves = plan.waves.len(), "wave plan installed");

    Ok(WaveDispatcher::new(Box::new(NoPolicy)).build_execution_markdown(&plan, Some(&state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::project;

    fn request(tasks: &[&str]) -> PlanRequest {
        PlanRequest {
            feature: "orders".into(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            groups: None,
            members: vec![],
            complexity: None,
            level: None,
            force: false,
        }
    }

    #[test]
    fn parse_task_accepts_optional_title() {
        let t = parse_task("Service:Order service").unwrap();
        assert_eq!(t.layer, Some(Layer::Service));
        assert_eq!(t.title.as_deref(), Some("Order service"));
        assert_eq!(parse_task("dto").unwrap().title.as_deref(), Some("dto"));
        assert!(parse_task("frontend:x").is_err());
    }

    #[test]
    fn plan_groups_by_dependency_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        let md = plan(&p, request(&["service", "entity", "repository", "dto"])).unwrap();
        assert!(md.contains("feature: `orders`"));

        let state = p.require_state().unwrap();
        let layers: Vec<Vec<Layer>> = state.waves.iter().map(|w| w.layers()).collect();
        assert_eq!(
            layers,
            vec![vec![Layer::Entity, Layer::Dto], vec![Layer::Repository], vec![Layer::Service]]
        );
    }

    #[test]
    fn unfinished_execution_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        plan(&p, request(&["entity"])).unwrap();
        assert!(plan(&p, request(&["dto"])).is_err());

        let mut forced = request(&["dto"]);
        forced.force = true;
        plan(&p, forced).unwrap();
        assert_eq!(p.require_state().unwrap().waves[0].layers(), vec![Layer::Dto]);
    }

    #[test]
    fn explicit_groups_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let p = project(&dir);
        let groups = dir.path().join("groups.json");
        std::fs::write(&groups, r#"[[{"layer":"entity"},{"layer":"repository"}]]"#).unwrap();
        let mut req = request(&[]);
        req.groups = Some(groups);
        assert!(plan(&p, req).is_err());
        assert!(p.store().load_wave_execution().unwrap().is_none());
    }
}
