//! File-locked persistence of the team/wave state document.
//!
//! Every read-modify-write goes through [`StateStore::with_lock`] (or one of
//! the helpers built on it) so concurrent hook invocations from separate
//! processes never interleave. Writes land in a temp file that is renamed
//! over the target.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::file_lock::{FileLock, LockError, LockOptions};
use crate::paths::ProjectPaths;
use crate::types::{lenient_timestamp, WaveState};

pub const TEAM_STATE_VERSION: &str = "1.2";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// `team-state.json`. Keys this crate does not own are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_wave_execution")]
    pub wave_execution: Option<WaveState>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for TeamState {
    fn default() -> Self {
        Self {
            version: default_version(),
            wave_execution: None,
            updated_at: None,
            extra: serde_json::Map::new(),
        }
    }
}

fn default_version() -> String {
    TEAM_STATE_VERSION.to_string()
}

fn lenient_wave_execution<'de, D>(deserializer: D) -> std::result::Result<Option<WaveState>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(value @ serde_json::Value::Object(_)) => match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "discarding malformed waveExecution");
                None
            }
        },
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock: FileLock,
}

impl StateStore {
    pub fn new(paths: &ProjectPaths, options: LockOptions) -> Self {
        Self::at(paths.team_state(), options)
    }

    pub fn at(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        let path = path.into();
        let lock = FileLock::for_document(&path, options);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document without locking. A missing file yields the default.
    pub fn load_team_state(&self) -> Result<TeamState> {
        read_json_or_default(&self.path)
    }

    /// Stamp `updatedAt` and write atomically. Callers should hold the lock.
    pub fn save_team_state(&self, state: &mut TeamState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        write_json_atomic(&self.path, state)
    }

    /// Run `f` while holding the team-state lock.
    pub fn with_team_lock<T, E>(&self, f: impl FnOnce() -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let _guard = self.lock.acquire().map_err(|e| E::from(StoreError::from(e)))?;
        f()
    }

    /// Install a fresh wave execution, replacing any previous one.
    pub fn init_wave_execution(&self, wave_state: WaveState) -> Result<()> {
        self.with_team_lock(|| {
            let mut doc = self.load_team_state()?;
            debug!(
                feature = %wave_state.feature_slug,
                total_waves = wave_state.total_waves,
                "initialising wave execution"
            );
            doc.wave_execution = Some(wave_state);
            self.save_team_state(&mut doc)
        })
    }

    /// Mutate the stored wave execution under the lock.
    ///
    /// Returns `Ok(None)` without writing when no wave execution exists. The
    /// document is only saved when `f` succeeds.
    pub fn update_wave_execution<T, E>(
        &self,
        f: impl FnOnce(&mut WaveState) -> std::result::Result<T, E>,
    ) -> std::result::Result<Option<T>, E>
    where
        E: From<StoreError>,
    {
        self.with_team_lock(|| {
            let mut doc = self.load_team_state().map_err(E::from)?;
            let Some(wave_state) = doc.wave_execution.as_mut() else {
                debug!("no wave execution to update");
                return Ok(None);
            };
            let out = f(wave_state)?;
            self.save_team_state(&mut doc).map_err(E::from)?;
            Ok(Some(out))
        })
    }

    pub fn load_wave_execution(&self) -> Result<Option<WaveState>> {
        Ok(self.load_team_state()?.wave_execution)
    }

    pub fn clear_wave_execution(&self) -> Result<()> {
        self.with_team_lock(|| {
            let mut doc = self.load_team_state()?;
            doc.wave_execution = None;
            self.save_team_state(&mut doc)
        })
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Read a JSON document; a missing or unparsable file yields `T::default()`.
pub fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unparsable document, using defaults");
            Ok(T::default())
        }
    }
}

/// Write pretty JSON to a temp file next to `path`, then rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    std::fs::write(&tmp, json.as_bytes())?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
