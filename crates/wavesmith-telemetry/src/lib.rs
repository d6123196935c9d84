//! Logging setup for the wavesmith binaries.
//!
//! All output goes to stderr; stdout is reserved for the Markdown and JSON
//! the commands print.

pub mod logging;

pub use logging::{init_from_config, init_logging, init_logging_json};
