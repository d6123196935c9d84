//! Per-run wave metrics and the rolling `wave-metrics.json` history.
//!
//! A finished run is flattened into [`RunMetrics`] (one entry per task, with
//! its duration and failure class) and appended to a bounded history that the
//! policy learner reads back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wavesmith_core::failure::classify_failure;
use wavesmith_core::file_lock::{FileLock, LockOptions};
use wavesmith_core::paths::ProjectPaths;
use wavesmith_core::state_store::{read_json_or_default, write_json_atomic};
use wavesmith_core::types::{FailureClass, Layer, TaskStatus, WaveState};
use wavesmith_core::wave_state::FinalizeReport;

use crate::Result;

pub const METRICS_VERSION: &str = "1.0";
pub const DEFAULT_MAX_RUNS: usize = 50;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetrics {
    pub layer: Layer,
    pub agent: Option<String>,
    pub status: TaskStatus,
    pub duration_ms: Option<u64>,
    pub verify_passed: bool,
    pub retry_of: Option<u32>,
    pub failure_class: Option<FailureClass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveMetrics {
    pub wave_index: u32,
    /// Earliest task start to latest task completion.
    pub duration_ms: Option<u64>,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub rescheduled_tasks: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub run_id: String,
    pub feature_slug: String,
    pub completed_at: DateTime<Utc>,
    pub total_waves: u32,
    pub waves: Vec<WaveMetrics>,
    pub summary: RunSummary,
    /// Latest task completion in the recorded execution; identifies it across `record` calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task_completed_at: Option<DateTime<Utc>>,
}

impl RunMetrics {
    /// Both records describe the same wave execution.
    pub fn same_execution(&self, other: &RunMetrics) -> bool {
        self.feature_slug == other.feature_slug
            && self.last_task_completed_at.is_some()
            && self.last_task_completed_at == other.last_task_completed_at
    }
}

/// `wave-metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsHistory {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub runs: Vec<RunMetrics>,
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self {
            version: default_version(),
            runs: Vec::new(),
        }
    }
}

fn default_version() -> String {
    METRICS_VERSION.to_string()
}

impl MetricsHistory {
    /// Every task record across all retained runs, oldest first.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskMetrics> {
        self.runs
            .iter()
            .flat_map(|run| run.waves.iter())
            .flat_map(|wave| wave.tasks.iter())
    }

    pub fn layer_stats(&self, layer: Layer) -> TaskStats {
        TaskStats::from_tasks(self.tasks().filter(|t| t.layer == layer))
    }

    pub fn agent_stats(&self, agent: &str) -> TaskStats {
        TaskStats::from_tasks(self.tasks().filter(|t| t.agent.as_deref() == Some(agent)))
    }
}

/// Aggregate over a set of task records. All zeros when the set is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub count: usize,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

impl TaskStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskMetrics>) -> Self {
        let mut count = 0usize;
        let mut completed = 0usize;
        let mut durations = Vec::new();
        for task in tasks {
            count += 1;
            if task.status == TaskStatus::Completed {
                completed += 1;
            }
            durations.extend(task.duration_ms);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            count,
            success_rate: completed as f64 / count as f64,
            avg_duration_ms: mean(&durations).unwrap_or(0.0),
        }
    }
}

pub(crate) fn mean(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Flatten a finished run.
///
/// A failed task keeps the failure class recorded on it; otherwise it is
/// classified against `report`, the last finalisation of its wave.
pub fn build_run_metrics(
    state: &WaveState,
    report: Option<&FinalizeReport>,
    completed_at: DateTime<Utc>,
) -> RunMetrics {
    let feature_slug = if state.feature_slug.is_empty() {
        "unknown".to_string()
    } else {
        state.feature_slug.clone()
    };
    let mut summary = RunSummary::default();

    let waves: Vec<WaveMetrics> = state
        .waves
        .iter()
        .map(|wave| {
            let tasks = wave
                .tasks
                .iter()
                .map(|task| {
                    summary.total_tasks += 1;
                    match task.status {
                        TaskStatus::Completed => summary.completed_tasks += 1,
                        TaskStatus::Failed => summary.failed_tasks += 1,
                        _ => {}
                    }
                    if task.retry_of.is_some() {
                        summary.rescheduled_tasks += 1;
                    }
                    let failure_class = (task.status == TaskStatus::Failed).then(|| {
                        task.failure_class
                            .unwrap_or_else(|| classify_failure(task, report))
                    });
                    TaskMetrics {
                        layer: task.layer,
                        agent: task.agent_id.clone(),
                        status: task.status,
                        duration_ms: task.duration_ms(),
                        verify_passed: task.status == TaskStatus::Completed,
                        retry_of: task.retry_of,
                        failure_class,
                    }
                })
                .collect();

            let start = wave.tasks.iter().filter_map(|t| t.started_at).min();
            let end = wave.tasks.iter().filter_map(|t| t.completed_at).max();
            let duration_ms = match (start, end) {
                (Some(s), Some(e)) => u64::try_from((e - s).num_milliseconds()).ok(),
                _ => None,
            };
            WaveMetrics {
                wave_index: wave.wave_index,
                duration_ms,
                tasks,
            }
        })
        .collect();

    if summary.total_tasks > 0 {
        summary.success_rate = summary.completed_tasks as f64 / summary.total_tasks as f64;
    }

    let last_task_completed_at = state
        .waves
        .iter()
        .flat_map(|w| w.tasks.iter())
        .filter_map(|t| t.completed_at)
        .max();

    RunMetrics {
        run_id: format!("{feature_slug}-{}", completed_at.timestamp_millis()),
        feature_slug,
        completed_at,
        total_waves: state.waves.len() as u32,
        waves,
        summary,
        last_task_completed_at,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct MetricsStore {
    path: PathBuf,
    lock: FileLock,
    max_runs: usize,
}

impl MetricsStore {
    pub fn new(paths: &ProjectPaths, options: LockOptions, max_runs: usize) -> Self {
        Self::at(paths.metrics(), options, max_runs)
    }

    pub fn at(path: impl Into<PathBuf>, options: LockOptions, max_runs: usize) -> Self {
        let path = path.into();
        let lock = FileLock::for_document(&path, options);
        Self {
            path,
            lock,
            max_runs: max_runs.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable history loads as empty.
    pub fn load(&self) -> Result<MetricsHistory> {
        Ok(read_json_or_default(&self.path)?)
    }

    /// Append a run, dropping the oldest beyond `max_runs`. Returns the retained count.
    pub fn append(&self, run: RunMetrics) -> Result<usize> {
        self.lock.with_lock(|| {
            let mut history = self.load()?;
            debug!(run_id = %run.run_id, "appending run metrics");
            self.push_trimmed(&mut history, run);
            write_json_atomic(&self.path, &history)?;
            Ok(history.runs.len())
        })
    }

    /// Like [`MetricsStore::append`], but `None` if the execution is already recorded.
    pub fn append_new(&self, run: RunMetrics) -> Result<Option<usize>> {
        self.lock.with_lock(|| {
            let mut history = self.load()?;
            if let Some(existing) = history.runs.iter().find(|r| r.same_execution(&run)) {
                debug!(run_id = %existing.run_id, "execution already recorded");
                return Ok(None);
            }
            self.push_trimmed(&mut history, run);
            write_json_atomic(&self.path, &history)?;
            Ok(Some(history.runs.len()))
        })
    }

    fn push_trimmed(&self, history: &mut MetricsHistory, run: RunMetrics) {
        history.runs.push(run);
        if history.runs.len() > self.max_runs {
            let excess = history.runs.len() - self.max_runs;
            history.runs.drain(..excess);
            info!(dropped = excess, "trimmed metrics history");
        }
    }

    pub fn layer_stats(&self, layer: Layer) -> Result<TaskStats> {
        Ok(self.load()?.layer_stats(layer))
    }

    pub fn agent_stats(&self, agent: &str) -> Result<TaskStats> {
        Ok(self.load()?.agent_stats(agent))
    }
}
