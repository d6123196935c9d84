//! Metrics history and policy learning against a temp project directory.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use wavesmith_core::config::MetricsConfig;
use wavesmith_core::file_lock::LockOptions;
use wavesmith_core::paths::ProjectPaths;
use wavesmith_core::policy::{PolicyAdvisor, SuggestionKind};
use wavesmith_core::types::*;
use wavesmith_intelligence::{build_run_metrics, MetricsStore, PolicyLearner};

fn options() -> LockOptions {
    LockOptions {
        timeout: Duration::from_millis(200),
        stale_after: Duration::from_secs(30),
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
}

/// One-wave run: entity always completes, service completes only when `service_ok`.
fn run_state(service_ok: bool) -> WaveState {
    let mut entity = WaveTask::pending(Layer::Entity, "wave-1/shop/entity");
    entity.status = TaskStatus::Completed;
    entity.agent_id = Some("domain-expert".into());
    entity.started_at = Some(at(0));
    entity.completed_at = Some(at(1_000));

    let mut service = WaveTask::pending(Layer::Service, "wave-1/shop/service");
    service.agent_id = Some("service-expert".into());
    service.started_at = Some(at(0));
    service.completed_at = Some(at(9_000));
    if service_ok {
        service.status = TaskStatus::Completed;
    } else {
        service.status = TaskStatus::Failed;
        service.failure_class = Some(FailureClass::VerifyFail);
    }

    WaveState {
        feature_slug: "shop".into(),
        current_wave: 1,
        total_waves: 1,
        status: RunStatus::Completed,
        complexity_score: None,
        waves: vec![Wave {
            status: WaveStatus::Completed,
            tasks: vec![entity, service],
            ..Wave::new(1)
        }],
    }
}

#[test]
fn append_trims_to_max_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = MetricsStore::new(&ProjectPaths::new(dir.path()), options(), 3);
    for i in 0..5 {
        let retained = store
            .append(build_run_metrics(&run_state(true), None, at(i)))
            .unwrap();
        assert_eq!(retained, (i as usize + 1).min(3));
    }
    let history = store.load().unwrap();
    assert_eq!(history.runs.len(), 3);
    assert_eq!(history.runs[0].completed_at, at(2));
    assert_eq!(store.layer_stats(Layer::Entity).unwrap().count, 3);
    assert_eq!(store.agent_stats("service-expert").unwrap().success_rate, 1.0);
}

#[test]
fn same_execution_is_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = MetricsStore::new(&ProjectPaths::new(dir.path()), options(), 50);
    let state = run_state(false);

    assert_eq!(store.append_new(build_run_metrics(&state, None, at(10_000))).unwrap(), Some(1));
    assert_eq!(store.append_new(build_run_metrics(&state, None, at(20_000))).unwrap(), None);

    let mut later = run_state(true);
    later.waves[0].tasks[1].completed_at = Some(at(12_000));
    assert_eq!(store.append_new(build_run_metrics(&later, None, at(30_000))).unwrap(), Some(2));

    let history = store.load().unwrap();
    assert_eq!(history.runs.len(), 2);
    assert_eq!(history.runs[0].last_task_completed_at, Some(at(9_000)));
}

#[test]
fn corrupt_history_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    std::fs::create_dir_all(paths.state_dir()).unwrap();
    std::fs::write(paths.metrics(), "{ not json").unwrap();
    let store = MetricsStore::new(&paths, options(), 50);
    assert!(store.load().unwrap().runs.is_empty());
}

#[test]
fn rebuild_waits_for_enough_runs() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    let learner = PolicyLearner::new(&paths, options(), &MetricsConfig::default());

    for i in 0..4 {
        learner
            .metrics()
            .append(build_run_metrics(&run_state(false), None, at(i)))
            .unwrap();
    }
    assert!(learner.rebuild().unwrap().is_none());
    assert!(!paths.policy().exists());
    assert!(learner.policy().is_none());
    assert!(learner.suggestions().unwrap().is_empty());
}

#[test]
fn rebuild_learns_and_persists_policy() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    let learner = PolicyLearner::new(&paths, options(), &MetricsConfig::default());

    for i in 0..5 {
        learner
            .metrics()
            .append(build_run_metrics(&run_state(i == 0), None, at(i)))
            .unwrap();
    }
    let policy = learner.rebuild().unwrap().unwrap();
    assert!(paths.policy().exists());

    let service = &policy.layer_policies[&Layer::Service];
    assert!((service.success_rate - 0.2).abs() < 1e-9);
    assert_eq!(service.failure_pattern, Some(FailureClass::VerifyFail));
    assert_eq!(service.avg_duration_ms, Some(9_000));
    assert!(policy.layer_policies[&Layer::Entity].suggestion.is_none());
    assert!(policy.agent_policies["service-expert"].suggestion.is_some());
    // Two timed layers: 9000 is not above twice their 5000 mean.
    assert!(policy.wave_grouping_suggestion.is_none());

    let loaded = learner.policy().unwrap();
    assert_eq!(loaded.layer_policies.len(), 2);
    let kinds: Vec<SuggestionKind> = learner.suggestions().unwrap().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, vec![SuggestionKind::Layer, SuggestionKind::Agent]);
}
