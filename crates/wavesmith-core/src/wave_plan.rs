//! Wave plan construction.
//!
//! Everything here is pure: task groups go in, ordered waves come out. The
//! grouping helper is what keeps waves dependency-safe; `build_wave_plan`
//! trusts its caller and only normalises (drops layerless tasks, drops empty
//! groups, renumbers from 1).

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::Layer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no waves")]
    Empty,
    #[error("layer {layer} in wave {wave} is not scheduled after its dependency {dependency} (wave {dependency_wave})")]
    DependencyOrder {
        layer: Layer,
        wave: u32,
        dependency: Layer,
        dependency_wave: u32,
    },
}

// ---------------------------------------------------------------------------
// Input / output types
// ---------------------------------------------------------------------------

/// A layer-tagged unit of work handed over by the request decomposer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default, deserialize_with = "lenient_layer")]
    pub layer: Option<Layer>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl TaskRequest {
    pub fn new(layer: Layer, title: impl Into<String>) -> Self {
        Self {
            layer: Some(layer),
            title: Some(title.into()),
            owner: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub layer: Layer,
    pub title: String,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedWave {
    pub wave_index: u32,
    pub layers: Vec<Layer>,
    pub tasks: Vec<PlannedTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WavePlan {
    pub feature_slug: String,
    pub waves: Vec<PlannedWave>,
}

impl WavePlan {
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Check that no layer shares a wave with, or precedes, one of its dependencies.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.waves.is_empty() {
            return Err(PlanError::Empty);
        }
        for wave in &self.waves {
            for layer in &wave.layers {
                for dependency in layer.dependencies() {
                    let late = self
                        .waves
                        .iter()
                        .find(|w| w.wave_index >= wave.wave_index && w.layers.contains(dependency));
                    if let Some(late) = late {
                        return Err(PlanError::DependencyOrder {
                            layer: *layer,
                            wave: wave.wave_index,
                            dependency: *dependency,
                            dependency_wave: late.wave_index,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Turn caller-supplied parallel groups into numbered waves.
pub fn build_wave_plan(groups: &[Vec<TaskRequest>], feature_slug: &str) -> WavePlan {
    let waves: Vec<PlannedWave> = groups
        .iter()
        .map(|group| {
            group
                .iter()
                .filter_map(|task| {
                    task.layer.map(|layer| PlannedTask {
                        layer,
                        title: task.title.clone().unwrap_or_default(),
                        owner: task.owner.clone(),
                    })
                })
                .collect::<Vec<_>>()
        })
        .filter(|tasks| !tasks.is_empty())
        .zip(1u32..)
        .map(|(tasks, wave_index)| PlannedWave {
            wave_index,
            layers: tasks.iter().map(|t| t.layer).collect(),
            tasks,
        })
        .collect();

    debug!(feature = feature_slug, waves = waves.len(), "built wave plan");
    WavePlan {
        feature_slug: feature_slug.to_string(),
        waves,
    }
}

/// Group tasks into dependency-safe parallel batches of at most `max_parallel`.
///
/// Tasks are visited in layer-rank order (stable within a rank). Each one goes
/// into the first group that sits after every group holding one of its
/// dependencies, has room, and contains only independent layers.
pub fn group_by_dependency(tasks: &[TaskRequest], max_parallel: usize) -> Vec<Vec<TaskRequest>> {
    let width = max_parallel.max(1);
    let mut ordered: Vec<(&TaskRequest, Layer)> = tasks
        .iter()
        .filter_map(|t| t.layer.map(|layer| (t, layer)))
        .collect();
    ordered.sort_by_key(|(_, layer)| layer.rank());

    let mut groups: Vec<Vec<(TaskRequest, Layer)>> = Vec::new();
    for (task, layer) in ordered {
        let floor = groups
            .iter()
            .rposition(|g| g.iter().any(|(_, other)| layer.depends_on(*other)))
            .map_or(0, |idx| idx + 1);

        let slot = groups.iter().enumerate().skip(floor).position(|(_, g)| {
            g.len() < width && g.iter().all(|(_, other)| layer.independent_of(*other))
        });

        match slot {
            Some(offset) => groups[floor + offset].push((task.clone(), layer)),
            None => groups.push(vec![(task.clone(), layer)]),
        }
    }

    groups
        .into_iter()
        .map(|g| g.into_iter().map(|(task, _)| task).collect())
        .collect()
}

/// Round-robin owner assignment; tasks keep `owner = None` when nobody is available.
pub fn assign_owners(tasks: &[TaskRequest], members: &[String]) -> Vec<TaskRequest> {
    tasks
        .iter()
        .enumerate()
        .map(|(idx, task)| TaskRequest {
            owner: if members.is_empty() {
                None
            } else {
                Some(members[idx % members.len()].clone())
            },
            ..task.clone()
        })
        .collect()
}

fn lenient_layer<'de, D>(deserializer: D) -> Result<Option<Layer>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| match s.parse::<Layer>() {
        Ok(layer) => Some(layer),
        Err(e) => {
            warn!(error = %e, "dropping task with unrecognised layer");
            None
        }
    }))
}
