use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::file_lock::LockOptions;
use crate::paths::{ProjectPaths, CONFIG_FILE, STATE_DIR};
use crate::types::ProjectLevel;

/// Engine configuration.
///
/// Looked up at `<root>/.wavesmith/config.toml`, then
/// `~/.config/wavesmith/config.toml`; missing files mean defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub team: TeamConfig,
    #[serde(default)]
    pub locking: LockingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cross_validation: CrossValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load the project config, falling back to the user config, then defaults.
    pub fn load_for_project(root: &Path) -> Result<Self, ConfigError> {
        let project = ProjectPaths::new(root).config();
        if project.exists() {
            return Self::load_from(project);
        }
        match Self::user_path() {
            Some(user) if user.exists() => Self::load_from(user),
            _ => {
                let cfg = Config::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.team.validate()?;
        self.locking.validate()?;
        self.metrics.validate()?;
        Ok(())
    }

    /// Paths for `root`, honouring a custom state directory name.
    pub fn project_paths(&self, root: &Path) -> ProjectPaths {
        ProjectPaths::with_state_dir(root, &self.general.state_dir)
    }

    fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wavesmith").join(CONFIG_FILE))
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_level")]
    pub level: ProjectLevel,
    /// Branch new worktrees start from. `None` means the current HEAD.
    #[serde(default)]
    pub base_branch: Option<String>,
    /// Branch name recorded in merge messages. `None` means HEAD.
    #[serde(default)]
    pub target_branch: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            level: default_level(),
            base_branch: None,
            target_branch: None,
        }
    }
}

impl GeneralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dir = self.state_dir.trim();
        if dir.is_empty() || dir.contains('/') || dir.contains('\\') || dir == ".." {
            return Err(ConfigError::Validation(format!(
                "general.state_dir '{}' must be a single directory name",
                self.state_dir
            )));
        }
        Ok(())
    }
}

fn default_state_dir() -> String {
    STATE_DIR.into()
}
fn default_level() -> ProjectLevel {
    ProjectLevel::SingleModule
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lead only coordinates and never takes a layer itself.
    #[serde(default)]
    pub delegate_mode: bool,
    #[serde(default)]
    pub max_parallel: MaxParallelConfig,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delegate_mode: false,
            max_parallel: MaxParallelConfig::default(),
        }
    }
}

impl TeamConfig {
    /// Widest wave allowed for `level`. A disabled team works one layer at a time.
    pub fn wave_width(&self, level: ProjectLevel) -> usize {
        if !self.enabled {
            return 1;
        }
        self.max_parallel.for_level(level).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.max_parallel.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct MaxParallelConfig {
    #[serde(default = "default_starter_parallel")]
    pub starter: usize,
    #[serde(default = "default_module_parallel")]
    pub single_module: usize,
    #[serde(default = "default_module_parallel")]
    pub multi_module: usize,
    #[serde(default = "default_module_parallel")]
    pub monolith: usize,
    #[serde(default = "default_msa_parallel")]
    pub msa: usize,
}

impl Default for MaxParallelConfig {
    fn default() -> Self {
        Self {
            starter: default_starter_parallel(),
            single_module: default_module_parallel(),
            multi_module: default_module_parallel(),
            monolith: default_module_parallel(),
            msa: default_msa_parallel(),
        }
    }
}

impl MaxParallelConfig {
    pub fn for_level(&self, level: ProjectLevel) -> usize {
        match level {
            ProjectLevel::Starter => self.starter,
            ProjectLevel::SingleModule => self.single_module,
            ProjectLevel::MultiModule => self.multi_module,
            ProjectLevel::Monolith => self.monolith,
            ProjectLevel::Msa => self.msa,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("starter", self.starter),
            ("single_module", self.single_module),
            ("multi_module", self.multi_module),
            ("monolith", self.monolith),
            ("msa", self.msa),
        ];
        for (name, value) in values {
            if value == 0 || value > 8 {
                return Err(ConfigError::Validation(format!(
                    "team.max_parallel.{name} must be between 1 and 8 (one per layer)"
                )));
            }
        }
        Ok(())
    }
}

fn default_starter_parallel() -> usize {
    1
}
fn default_module_parallel() -> usize {
    3
}
fn default_msa_parallel() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockingConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_lock_stale_ms")]
    pub stale_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            stale_ms: default_lock_stale_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl LockingConfig {
    pub fn options(&self) -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            stale_after: Duration::from_millis(self.stale_ms),
            initial_backoff: Duration::from_millis(self.backoff_initial_ms),
            max_backoff: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 || self.stale_ms == 0 {
            return Err(ConfigError::Validation(
                "locking.timeout_ms and locking.stale_ms must be positive".to_string(),
            ));
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::Validation(
                "locking.backoff_initial_ms must be positive and <= backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}
fn default_lock_stale_ms() -> u64 {
    10_000
}
fn default_backoff_initial_ms() -> u64 {
    10
}
fn default_backoff_max_ms() -> u64 {
    200
}

// ---------------------------------------------------------------------------
// Metrics / policy thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
    #[serde(default = "default_min_runs")]
    pub min_runs_for_policy: usize,
    #[serde(default = "default_low_success")]
    pub low_success_threshold: f64,
    #[serde(default = "default_slow_ratio")]
    pub slow_layer_ratio: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_runs: default_max_runs(),
            min_runs_for_policy: default_min_runs(),
            low_success_threshold: default_low_success(),
            slow_layer_ratio: default_slow_ratio(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_runs == 0 {
            return Err(ConfigError::Validation(
                "metrics.max_runs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.low_success_threshold) {
            return Err(ConfigError::Validation(
                "metrics.low_success_threshold must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.slow_layer_ratio <= 1.0 {
            return Err(ConfigError::Validation(
                "metrics.slow_layer_ratio must be greater than 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_runs() -> usize {
    50
}
fn default_min_runs() -> usize {
    5
}
fn default_low_success() -> f64 {
    0.7
}
fn default_slow_ratio() -> f64 {
    2.0
}

// ---------------------------------------------------------------------------
// Cross-validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossValidationConfig {
    #[serde(default = "default_cv_threshold")]
    pub threshold: u32,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            threshold: default_cv_threshold(),
        }
    }
}

fn default_cv_threshold() -> u32 {
    50
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}
