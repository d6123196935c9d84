use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// Architectural category of generated work.
///
/// A layer is the unit of dependency ordering, agent assignment and file
/// ownership. Every table keyed by layer is an exhaustive `match` on this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Entity,
    Dto,
    Config,
    Exception,
    Repository,
    Service,
    Controller,
    Test,
}

impl Layer {
    pub const ALL: [Layer; 8] = [
        Layer::Entity,
        Layer::Dto,
        Layer::Config,
        Layer::Exception,
        Layer::Repository,
        Layer::Service,
        Layer::Controller,
        Layer::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Entity => "entity",
            Layer::Dto => "dto",
            Layer::Config => "config",
            Layer::Exception => "exception",
            Layer::Repository => "repository",
            Layer::Service => "service",
            Layer::Controller => "controller",
            Layer::Test => "test",
        }
    }

    /// Layers that must be finished in an earlier wave.
    pub fn dependencies(&self) -> &'static [Layer] {
        match self {
            Layer::Entity | Layer::Dto | Layer::Config | Layer::Exception => &[],
            Layer::Repository => &[Layer::Entity],
            Layer::Service => &[Layer::Entity, Layer::Repository, Layer::Dto],
            Layer::Controller => &[Layer::Service, Layer::Dto, Layer::Exception],
            Layer::Test => &[
                Layer::Entity,
                Layer::Dto,
                Layer::Config,
                Layer::Exception,
                Layer::Repository,
                Layer::Service,
                Layer::Controller,
            ],
        }
    }

    pub fn depends_on(&self, other: Layer) -> bool {
        self.dependencies().contains(&other)
    }

    /// Two layers can share a wave when neither depends on the other.
    pub fn independent_of(&self, other: Layer) -> bool {
        !self.depends_on(other) && !other.depends_on(*self)
    }

    /// Length of the longest dependency chain below this layer.
    pub fn rank(&self) -> u8 {
        match self {
            Layer::Entity | Layer::Dto | Layer::Config | Layer::Exception => 0,
            Layer::Repository => 1,
            Layer::Service => 2,
            Layer::Controller => 3,
            Layer::Test => 4,
        }
    }

    /// Glob patterns (relative to the project root) owned by this layer.
    pub fn file_patterns(&self) -> &'static [&'static str] {
        match self {
            Layer::Entity => &["src/**/entity/**", "src/**/domain/**"],
            Layer::Dto => &["src/**/dto/**", "src/**/request/**", "src/**/response/**"],
            Layer::Config => &["src/**/config/**"],
            Layer::Exception => &["src/**/exception/**", "src/**/error/**"],
            Layer::Repository => &["src/**/repository/**", "src/**/repo/**"],
            Layer::Service => &["src/**/service/**"],
            Layer::Controller => &["src/**/controller/**", "src/**/api/**"],
            Layer::Test => &["src/test/**", "test/**"],
        }
    }

    /// Agent that implements this layer when no other assignment exists.
    pub fn default_agent(&self) -> &'static str {
        match self {
            Layer::Entity => "domain-expert",
            Layer::Dto => "report-generator",
            Layer::Config => "spring-architect",
            Layer::Exception => "security-expert",
            Layer::Repository => "dba-expert",
            Layer::Service => "service-expert",
            Layer::Controller => "api-expert",
            Layer::Test => "test-expert",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown layer: {0}")]
pub struct ParseLayerError(pub String);

impl FromStr for Layer {
    type Err = ParseLayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == needle)
            .ok_or_else(|| ParseLayerError(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ProjectLevel
// ---------------------------------------------------------------------------

/// Project scale reported by the project analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectLevel {
    Starter,
    SingleModule,
    MultiModule,
    Monolith,
    #[serde(rename = "MSA")]
    Msa,
}

impl ProjectLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectLevel::Starter => "Starter",
            ProjectLevel::SingleModule => "SingleModule",
            ProjectLevel::MultiModule => "MultiModule",
            ProjectLevel::Monolith => "Monolith",
            ProjectLevel::Msa => "MSA",
        }
    }
}

impl fmt::Display for ProjectLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starter" => Ok(ProjectLevel::Starter),
            "singlemodule" | "single_module" | "single-module" => Ok(ProjectLevel::SingleModule),
            "multimodule" | "multi_module" | "multi-module" => Ok(ProjectLevel::MultiModule),
            "monolith" => Ok(ProjectLevel::Monolith),
            "msa" => Ok(ProjectLevel::Msa),
            other => Err(format!("unknown project level: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl fmt::Display for WaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WaveStatus::Pending => "pending",
            WaveStatus::InProgress => "in_progress",
            WaveStatus::Completed => "completed",
            WaveStatus::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Stable failure taxonomy reported instead of raw subprocess output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    VerifyFail,
    MergeConflict,
    AgentError,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::VerifyFail => "verify_fail",
            FailureClass::MergeConflict => "merge_conflict",
            FailureClass::AgentError => "agent_error",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WaveTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveTask {
    pub layer: Layer,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub branch_name: String,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<u32>,
    #[serde(default)]
    pub failure_class: Option<FailureClass>,
}

impl WaveTask {
    pub fn pending(layer: Layer, branch_name: impl Into<String>) -> Self {
        Self {
            layer,
            title: layer.as_str().to_string(),
            owner: None,
            branch_name: branch_name.into(),
            worktree_path: None,
            agent_id: None,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            retry_of: None,
            failure_class: None,
        }
    }

    /// Elapsed time between start and completion, if both are known and ordered.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}

/// Branch naming used for every wave worktree.
pub fn wave_branch_name(wave_index: u32, feature_slug: &str, layer: Layer) -> String {
    format!("wave-{wave_index}/{feature_slug}/{layer}")
}

// ---------------------------------------------------------------------------
// Cross-validation record
// ---------------------------------------------------------------------------

/// One independent review assignment for a completed layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPair {
    pub layer: Layer,
    #[serde(default)]
    pub implementer: Option<String>,
    pub validator: String,
    pub file_patterns: Vec<String>,
    pub checklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossValidationRecord {
    pub required: bool,
    #[serde(default)]
    pub pairs: Vec<ValidationPair>,
}

// ---------------------------------------------------------------------------
// Wave / WaveState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wave {
    pub wave_index: u32,
    pub status: WaveStatus,
    #[serde(default)]
    pub tasks: Vec<WaveTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<CrossValidationRecord>,
}

impl Wave {
    pub fn new(wave_index: u32) -> Self {
        Self {
            wave_index,
            status: WaveStatus::Pending,
            tasks: Vec::new(),
            cross_validation: None,
        }
    }

    pub fn layers(&self) -> Vec<Layer> {
        self.tasks.iter().map(|t| t.layer).collect()
    }

    pub fn contains_layer(&self, layer: Layer) -> bool {
        self.tasks.iter().any(|t| t.layer == layer)
    }

    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn failed_layers(&self) -> Vec<Layer> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.layer)
            .collect()
    }
}

/// Whole-run scheduling state for one feature, persisted as a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveState {
    pub feature_slug: String,
    #[serde(default)]
    pub current_wave: u32,
    pub total_waves: u32,
    pub status: RunStatus,
    #[serde(default)]
    pub complexity_score: Option<u32>,
    #[serde(default)]
    pub waves: Vec<Wave>,
}

impl WaveState {
    pub fn wave(&self, wave_index: u32) -> Option<&Wave> {
        self.waves.iter().find(|w| w.wave_index == wave_index)
    }

    pub fn wave_mut(&mut self, wave_index: u32) -> Option<&mut Wave> {
        self.waves.iter_mut().find(|w| w.wave_index == wave_index)
    }

    /// The wave currently marked `in_progress`, if any.
    pub fn active_wave(&self) -> Option<&Wave> {
        self.waves.iter().find(|w| w.status == WaveStatus::InProgress)
    }

    pub fn all_waves_completed(&self) -> bool {
        !self.waves.is_empty() && self.waves.iter().all(|w| w.status == WaveStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Accepts RFC 3339 strings; anything else (null, garbage, numbers) becomes `None`.
pub fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_graph_has_no_cycles() {
        for layer in Layer::ALL {
            for dep in layer.dependencies() {
                assert!(dep.rank() < layer.rank(), "{dep} must rank below {layer}");
                assert!(!dep.depends_on(layer));
            }
        }
    }

    #[test]
    fn foundation_layers_are_mutually_independent() {
        let base = [Layer::Entity, Layer::Dto, Layer::Config, Layer::Exception];
        for a in base {
            for b in base {
                assert!(a.independent_of(b));
            }
        }
        assert!(!Layer::Service.independent_of(Layer::Repository));
        assert!(Layer::Repository.independent_of(Layer::Dto));
    }

    #[test]
    fn layer_parses_case_insensitively() {
        assert_eq!("Controller".parse::<Layer>().unwrap(), Layer::Controller);
        assert_eq!(" dto ".parse::<Layer>().unwrap(), Layer::Dto);
        assert!("view".parse::<Layer>().is_err());
    }

    #[test]
    fn task_transitions_follow_lifecycle() {
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_transition_to(&TaskStatus::Completed));
    }

    #[test]
    fn unparsable_timestamps_load_as_none() {
        let json = r#"{
            "layer": "entity",
            "branchName": "wave-1/x/entity",
            "status": "completed",
            "startedAt": "not-a-date",
            "completedAt": "2026-01-02T03:04:05Z"
        }"#;
        let task: WaveTask = serde_json::from_str(json).unwrap();
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(task.duration_ms(), None);
    }

    #[test]
    fn negative_duration_is_discarded() {
        let mut task = WaveTask::pending(Layer::Dto, "b");
        let now = Utc::now();
        task.started_at = Some(now);
        task.completed_at = Some(now - chrono::Duration::seconds(5));
        assert_eq!(task.duration_ms(), None);
        task.completed_at = Some(now + chrono::Duration::milliseconds(1500));
        assert_eq!(task.duration_ms(), Some(1500));
    }

    #[test]
    fn enums_use_snake_case_on_the_wire() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&FailureClass::MergeConflict).unwrap(),
            "\"merge_conflict\""
        );
        assert_eq!(serde_json::to_string(&ProjectLevel::Msa).unwrap(), "\"MSA\"");
    }
}
