//! Logging setup for damper components.
//!
//! Filter resolution: `DAMPER_LOG` env var, then `RUST_LOG`, then a default
//! derived from the config (`debug` when debug mode is on, `warn` otherwise).
//! Output goes to stderr, or to the configured debug-log file.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::Config;

/// Initialize tracing for the current process.
/// Call this once at application startup; repeated calls are no-ops.
pub fn init(config: &Config) {
    let default = if config.log.debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("DAMPER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if let Some(path) = &config.log.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = builder.with_writer(Arc::new(file)).try_init();
                return;
            }
            Err(e) => {
                eprintln!(
                    "[damper-config] WARNING: cannot open debug log {:?}: {}. Logging to stderr.",
                    path, e
                );
            }
        }
    }

    let _ = builder.with_writer(std::io::stderr).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = Config::default();
        init(&config);
        init(&config);
    }

    #[test]
    fn test_init_with_log_file() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.log.file = Some(temp.path().join("debug.log"));
        init(&config);
    }
}
