use tracing_subscriber::{fmt, EnvFilter};
use wavesmith_core::config::{LogFormat, LoggingConfig};

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize human-readable logging on stderr.
///
/// Uses `RUST_LOG` if set, otherwise `default_level` (e.g. "info",
/// "wavesmith_core=debug,warn"). Later calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    fmt()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, "logging initialised (human-readable)");
}

/// Initialize JSON logging on stderr. Later calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::debug!(service = service_name, "logging initialised (json)");
}

/// Initialize logging from the `[logging]` config section.
///
/// `level_override` (typically from `-v`/`--log-level`) wins over the config.
pub fn init_from_config(service_name: &str, config: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    match config.format {
        LogFormat::Pretty => init_logging(service_name, level),
        LogFormat::Json => init_logging_json(service_name, level),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialisation_is_harmless() {
        let config = LoggingConfig {
            level: "debug".into(),
            format: LogFormat::Json,
        };
        init_from_config("test", &config, None);
        init_from_config("test", &config, Some("warn"));
        init_logging("test", "info");
        tracing::info!("still alive");
    }

    #[test]
    fn invalid_level_falls_back_without_panicking() {
        let _ = filter("not a level ===");
    }
}
