//! Learns advisory policy from the metrics history.
//!
//! Nothing is learned until enough runs exist. Past that point every rebuild
//! replaces `wave-policy.json` wholesale.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use wavesmith_core::config::MetricsConfig;
use wavesmith_core::file_lock::{FileLock, LockOptions};
use wavesmith_core::paths::ProjectPaths;
use wavesmith_core::policy::{AgentPolicy, LayerPolicy, Policy, PolicyAdvisor, PolicySuggestion, POLICY_VERSION};
use wavesmith_core::state_store::{read_json_or_default, write_json_atomic};
use wavesmith_core::types::{FailureClass, Layer, TaskStatus};

use crate::run_metrics::{mean, MetricsHistory, MetricsStore, TaskMetrics};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyThresholds {
    pub min_runs_for_policy: usize,
    /// Success rates below this produce a suggestion.
    pub low_success_threshold: f64,
    /// A layer slower than `ratio * mean` is flagged for its own wave.
    pub slow_layer_ratio: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            min_runs_for_policy: 5,
            low_success_threshold: 0.7,
            slow_layer_ratio: 2.0,
        }
    }
}

impl From<&MetricsConfig> for PolicyThresholds {
    fn from(config: &MetricsConfig) -> Self {
        Self {
            min_runs_for_policy: config.min_runs_for_policy,
            low_success_threshold: config.low_success_threshold,
            slow_layer_ratio: config.slow_layer_ratio,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure learning
// ---------------------------------------------------------------------------

pub fn learn_policy(history: &MetricsHistory, thresholds: &PolicyThresholds) -> Policy {
    let mut by_layer: BTreeMap<Layer, Vec<&TaskMetrics>> = BTreeMap::new();
    let mut by_agent: BTreeMap<String, Vec<&TaskMetrics>> = BTreeMap::new();
    for task in history.tasks() {
        by_layer.entry(task.layer).or_default().push(task);
        if let Some(agent) = &task.agent {
            by_agent.entry(agent.clone()).or_default().push(task);
        }
    }

    let layer_policies: BTreeMap<Layer, LayerPolicy> = by_layer
        .iter()
        .map(|(layer, tasks)| (*layer, layer_policy(*layer, tasks, thresholds)))
        .collect();
    let agent_policies = by_agent
        .iter()
        .map(|(agent, tasks)| (agent.clone(), agent_policy(agent, tasks, thresholds)))
        .collect();
    let wave_grouping_suggestion = wave_grouping_suggestion(&layer_policies, thresholds.slow_layer_ratio);

    Policy {
        version: POLICY_VERSION.to_string(),
        updated_at: Some(Utc::now()),
        layer_policies,
        agent_policies,
        wave_grouping_suggestion,
    }
}

fn success_rate(tasks: &[&TaskMetrics]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
    completed as f64 / tasks.len() as f64
}

fn percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

/// Most frequent failure class; ties go to the one seen first.
fn failure_pattern(tasks: &[&TaskMetrics]) -> Option<FailureClass> {
    let mut counts: Vec<(FailureClass, usize)> = Vec::new();
    for class in tasks.iter().filter_map(|t| t.failure_class) {
        match counts.iter_mut().find(|(c, _)| *c == class) {
            Some((_, n)) => *n += 1,
            None => counts.push((class, 1)),
        }
    }
    let mut best: Option<(FailureClass, usize)> = None;
    for (class, n) in counts {
        if best.is_none_or(|(_, top)| n > top) {
            best = Some((class, n));
        }
    }
    best.map(|(class, _)| class)
}

pub fn layer_policy(layer: Layer, tasks: &[&TaskMetrics], thresholds: &PolicyThresholds) -> LayerPolicy {
    let rate = success_rate(tasks);
    let durations: Vec<u64> = tasks.iter().filter_map(|t| t.duration_ms).collect();
    let pattern = failure_pattern(tasks);
    let suggestion = (rate < thresholds.low_success_threshold).then(|| {
        format!(
            "{layer} layer success rate {} (failure pattern: {})",
            percent(rate),
            pattern.map(|p| p.as_str()).unwrap_or("n/a")
        )
    });
    LayerPolicy {
        success_rate: rate,
        avg_duration_ms: mean(&durations).map(|m| m.round() as u64),
        failure_pattern: pattern,
        suggestion,
    }
}

pub fn agent_policy(agent: &str, tasks: &[&TaskMetrics], thresholds: &PolicyThresholds) -> AgentPolicy {
    let rate = success_rate(tasks);
    let suggestion = (rate < thresholds.low_success_threshold)
        .then(|| format!("{agent} agent success rate {}; consider reassignment", percent(rate)));
    AgentPolicy {
        success_rate: rate,
        suggestion,
    }
}

/// Flag layers much slower than the mean of all timed layers.
///
/// Needs at least two layers with a positive average duration.
pub fn wave_grouping_suggestion(layers: &BTreeMap<Layer, LayerPolicy>, ratio: f64) -> Option<String> {
    let timed: Vec<(Layer, u64)> = layers
        .iter()
        .filter_map(|(layer, p)| p.avg_duration_ms.filter(|ms| *ms > 0).map(|ms| (*layer, ms)))
        .collect();
    if timed.len() < 2 {
        return None;
    }
    let overall = timed.iter().map(|(_, ms)| *ms as f64).sum::<f64>() / timed.len() as f64;
    let slow: Vec<&str> = timed
        .iter()
        .filter(|(_, ms)| *ms as f64 > overall * ratio)
        .map(|(layer, _)| layer.as_str())
        .collect();
    if slow.is_empty() {
        return None;
    }
    Some(format!(
        "{} layer runs over {ratio}x the average duration; consider a separate wave",
        slow.join(", ")
    ))
}

// ---------------------------------------------------------------------------
// PolicyLearner
// ---------------------------------------------------------------------------

pub struct PolicyLearner {
    metrics: MetricsStore,
    policy_path: PathBuf,
    lock: FileLock,
    thresholds: PolicyThresholds,
}

impl PolicyLearner {
    pub fn new(paths: &ProjectPaths, options: LockOptions, config: &MetricsConfig) -> Self {
        Self::with_store(
            MetricsStore::new(paths, options, config.max_runs),
            paths.policy(),
            options,
            config.into(),
        )
    }

    pub fn with_store(
        metrics: MetricsStore,
        policy_path: impl Into<PathBuf>,
        options: LockOptions,
        thresholds: PolicyThresholds,
    ) -> Self {
        let policy_path = policy_path.into();
        let lock = FileLock::for_document(&policy_path, options);
        Self {
            metrics,
            policy_path,
            lock,
            thresholds,
        }
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    /// Relearn and persist the policy.
    ///
    /// Returns `None` and leaves any existing policy untouched while the
    /// history is shorter than `min_runs_for_policy`.
    pub fn rebuild(&self) -> Result<Option<Policy>> {
        let history = self.metrics.load()?;
        if history.runs.len() < self.thresholds.min_runs_for_policy {
            debug!(
                runs = history.runs.len(),
                required = self.thresholds.min_runs_for_policy,
                "not enough runs to learn a policy"
            );
            return Ok(None);
        }
        let policy = learn_policy(&history, &self.thresholds);
        self.lock
            .with_lock(|| Ok::<_, crate::IntelligenceError>(write_json_atomic(&self.policy_path, &policy)?))?;
        info!(
            layers = policy.layer_policies.len(),
            agents = policy.agent_policies.len(),
            "policy rebuilt"
        );
        Ok(Some(policy))
    }

    /// Stored policy; empty when none has been learned yet.
    pub fn load_policy(&self) -> Result<Policy> {
        Ok(read_json_or_default(&self.policy_path)?)
    }

    pub fn suggestions(&self) -> Result<Vec<PolicySuggestion>> {
        Ok(self.load_policy()?.suggestions())
    }
}

impl PolicyAdvisor for PolicyLearner {
    fn policy(&self) -> Option<Policy> {
        if !self.policy_path.exists() {
            return None;
        }
        match self.load_policy() {
            Ok(policy) => Some(policy),
            Err(e) => {
                warn!(error = %e, "policy unavailable, dispatching without advisories");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(layer: Layer, agent: &str, ok: bool, duration_ms: Option<u64>, class: Option<FailureClass>) -> TaskMetrics {
        TaskMetrics {
            layer,
            agent: Some(agent.to_string()),
            status: if ok { TaskStatus::Completed } else { TaskStatus::Failed },
            duration_ms,
            verify_passed: ok,
            retry_of: None,
            failure_class: class,
        }
    }

    #[test]
    fn layer_policy_picks_most_frequent_failure() {
        let t = PolicyThresholds::default();
        let tasks = [
            metric(Layer::Service, "service-expert", false, Some(100), Some(FailureClass::AgentError)),
            metric(Layer::Service, "service-expert", false, Some(300), Some(FailureClass::VerifyFail)),
            metric(Layer::Service, "service-expert", false, None, Some(FailureClass::VerifyFail)),
            metric(Layer::Service, "service-expert", true, Some(200), None),
        ];
        let refs: Vec<&TaskMetrics> = tasks.iter().collect();
        let p = layer_policy(Layer::Service, &refs, &t);
        assert_eq!(p.success_rate, 0.25);
        assert_eq!(p.avg_duration_ms, Some(200));
        assert_eq!(p.failure_pattern, Some(FailureClass::VerifyFail));
        let msg = p.suggestion.unwrap();
        assert!(msg.contains("service layer success rate 25%"));
        assert!(msg.contains("verify_fail"));
    }

    #[test]
    fn failure_pattern_tie_keeps_first_seen() {
        let tasks = [
            metric(Layer::Dto, "a", false, None, Some(FailureClass::MergeConflict)),
            metric(Layer::Dto, "a", false, None, Some(FailureClass::AgentError)),
        ];
        let refs: Vec<&TaskMetrics> = tasks.iter().collect();
        assert_eq!(failure_pattern(&refs), Some(FailureClass::MergeConflict));
        assert_eq!(failure_pattern(&[]), None);
    }

    #[test]
    fn healthy_layers_and_agents_have_no_suggestion() {
        let t = PolicyThresholds::default();
        let tasks = [metric(Layer::Entity, "domain-expert", true, Some(10), None)];
        let refs: Vec<&TaskMetrics> = tasks.iter().collect();
        assert!(layer_policy(Layer::Entity, &refs, &t).suggestion.is_none());
        assert!(agent_policy("domain-expert", &refs, &t).suggestion.is_none());

        let weak = [metric(Layer::Entity, "domain-expert", false, None, None)];
        let refs: Vec<&TaskMetrics> = weak.iter().collect();
        let a = agent_policy("domain-expert", &refs, &t);
        assert!(a.suggestion.unwrap().contains("consider reassignment"));
    }

    #[test]
    fn grouping_flags_slow_layers_only_with_two_timed_layers() {
        let lp = |ms: Option<u64>| LayerPolicy {
            success_rate: 1.0,
            avg_duration_ms: ms,
            failure_pattern: None,
            suggestion: None,
        };
        let mut layers = BTreeMap::new();
        layers.insert(Layer::Test, lp(Some(10_000)));
        layers.insert(Layer::Entity, lp(None));
        assert!(wave_grouping_suggestion(&layers, 2.0).is_none());

        layers.insert(Layer::Dto, lp(Some(100)));
        layers.insert(Layer::Config, lp(Some(100)));
        layers.insert(Layer::Exception, lp(Some(100)));
        let msg = wave_grouping_suggestion(&layers, 2.0).unwrap();
        assert!(msg.starts_with("test layer runs over 2x"));

        let mut even = BTreeMap::new();
        even.insert(Layer::Dto, lp(Some(100)));
        even.insert(Layer::Config, lp(Some(150)));
        assert!(wave_grouping_suggestion(&even, 2.0).is_none());
    }
}
