pub mod config;
pub mod failure;
pub mod file_index;
pub mod file_lock;
pub mod paths;
pub mod policy;
pub mod project;
pub mod state_store;
pub mod types;
pub mod wave_plan;
pub mod wave_state;
pub mod worktree_manager;
