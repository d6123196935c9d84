pub mod policy_learner;
pub mod run_metrics;

pub use policy_learner::{learn_policy, PolicyLearner, PolicyThresholds};
pub use run_metrics::{build_run_metrics, MetricsHistory, MetricsStore, RunMetrics, TaskStats};

use thiserror::Error;
use wavesmith_core::file_lock::LockError;
use wavesmith_core::state_store::StoreError;

// ---------------------------------------------------------------------------
// Crate-level error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IntelligenceError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, IntelligenceError>;
