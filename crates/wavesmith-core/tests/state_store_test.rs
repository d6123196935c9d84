use std::time::Duration;

use wavesmith_core::file_lock::{FileLock, LockError, LockOptions};
use wavesmith_core::paths::ProjectPaths;
use wavesmith_core::state_store::{StateStore, StoreError, TeamState, TEAM_STATE_VERSION};
use wavesmith_core::types::{Layer, WaveState};
use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest};

fn options() -> LockOptions {
    LockOptions {
        timeout: Duration::from_millis(150),
        stale_after: Duration::from_secs(30),
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(25),
    }
}

fn sample_state() -> WaveState {
    let plan = build_wave_plan(
        &[vec![TaskRequest::new(Layer::Entity, "User entity")]],
        "signup",
    );
    WaveState::from_plan(&plan, None)
}

#[test]
fn missing_document_loads_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(&ProjectPaths::new(dir.path()), options());
    let doc = store.load_team_state().unwrap();
    assert_eq!(doc.version, TEAM_STATE_VERSION);
    assert!(doc.wave_execution.is_none());
    assert!(store.load_wave_execution().unwrap().is_none());
}

#[test]
fn init_then_update_persists_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(&ProjectPaths::new(dir.path()), options());
    store.init_wave_execution(sample_state()).unwrap();

    let updated: Option<u32> = store
        .update_wave_execution(|ws| {
            ws.current_wave = 1;
            Ok::<_, StoreError>(ws.total_waves)
        })
        .unwrap();
    assert_eq!(updated, Some(1));

    let loaded = store.load_wave_execution().unwrap().unwrap();
    assert_eq!(loaded.current_wave, 1);
    assert_eq!(loaded.feature_slug, "signup");
    assert!(store.load_team_state().unwrap().updated_at.is_some());
    assert!(!FileLock::for_document(store.path(), options()).path().exists());
}

#[test]
fn update_without_wave_execution_does_not_write() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(&ProjectPaths::new(dir.path()), options());
    let out = store
        .update_wave_execution(|_| Ok::<_, StoreError>(()))
        .unwrap();
    assert!(out.is_none());
    assert!(!store.path().exists());
}

#[test]
fn failed_update_leaves_document_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(&ProjectPaths::new(dir.path()), options());
    store.init_wave_execution(sample_state()).unwrap();
    let before = std::fs::read_to_string(store.path()).unwrap();

    let result: Result<Option<()>, StoreError> = store.update_wave_execution(|ws| {
        ws.current_wave = 9;
        Err(StoreError::Io(std::io::Error::other("boom")))
    });
    assert!(result.is_err());
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
}

#[test]
fn unknown_keys_survive_and_malformed_wave_execution_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::new(dir.path());
    std::fs::create_dir_all(paths.state_dir()).unwrap();
    std::fs::write(
        paths.team_state(),
        r#"{"version":"1.1","waveExecution":"garbage","members":[{"name":"lead"}],"phase":"do"}"#,
    )
    .unwrap();

    let store = StateStore::new(&paths, options());
    let mut doc: TeamState = store.load_team_state().unwrap();
    assert!(doc.wave_execution.is_none());
    assert_eq!(doc.extra["phase"], "do");

    store.save_team_state(&mut doc).unwrap();
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(paths.team_state()).unwrap()).unwrap();
    assert_eq!(raw["members"][0]["name"], "lead");
    assert!(raw["waveExecution"].is_null());
}

#[test]
fn held_lock_times_out_updates() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(&ProjectPaths::new(dir.path()), options());
    store.init_wave_execution(sample_state()).unwrap();

    let lock = FileLock::for_document(store.path(), options());
    let _held = lock.acquire().unwrap();
    let err = store
        .update_wave_execution(|_| Ok::<_, StoreError>(()))
        .unwrap_err();
    assert!(matches!(err, StoreError::Lock(LockError::Timeout { .. })));
}
