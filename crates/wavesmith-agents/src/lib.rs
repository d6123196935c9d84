//! Agent-facing side of wave execution: who implements and reviews each
//! layer, which files they own, and the Markdown handed to the executor.

pub mod cross_validator;
pub mod dispatcher;
pub mod dynamic_scheduler;
pub mod ownership;
pub mod roster;
pub mod work_pod;
