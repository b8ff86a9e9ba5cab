//! # damper-config
//!
//! Configuration management for damper.
//!
//! Loads configuration from:
//! 1. Built-in defaults
//! 2. `~/.damper/config.toml` (global)
//! 3. Environment variables (highest priority)

pub mod logging;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| {
    RwLock::new(Config::load().unwrap_or_else(|e| {
        eprintln!(
            "[damper-config] WARNING: Failed to load config: {}. Using defaults.",
            e
        );
        Config::default()
    }))
});

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub gc: GcConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            gc: GcConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the standard locations.
    /// Resolution order: defaults → global file → env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.damper/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".damper/config.toml"))
    }

    /// Apply environment variable overrides (highest priority)
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DAMPER_STATE_DIR") {
            self.store.state_dir = PathBuf::from(dir);
        }
        if let Ok(wait) = std::env::var("DAMPER_LOCK_WAIT_MS") {
            if let Ok(ms) = wait.parse() {
                self.store.lock_wait_ms = ms;
            }
        }
        if let Ok(interval) = std::env::var("DAMPER_GC_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.gc.interval_ms = ms;
            }
        }
        if let Ok(stale) = std::env::var("DAMPER_STALE_AFTER_MS") {
            if let Ok(ms) = stale.parse() {
                self.gc.stale_after_ms = ms;
            }
        }
        if std::env::var("DAMPER_DEBUG").is_ok() {
            self.log.debug = true;
        }
        if let Ok(path) = std::env::var("DAMPER_DEBUG_LOG") {
            self.log.file = Some(PathBuf::from(path));
        }
    }

    // ========== Convenience Accessors ==========

    /// Directory holding all coordination state files
    pub fn state_dir(&self) -> &std::path::Path {
        &self.store.state_dir
    }

    /// Bounded wait for the per-key state lock, in milliseconds
    pub fn lock_wait_ms(&self) -> u64 {
        self.store.lock_wait_ms
    }

    /// Check if debug tracing is enabled
    pub fn debug_mode(&self) -> bool {
        self.log.debug
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding per-key state files.
    /// Env override: DAMPER_STATE_DIR
    pub state_dir: PathBuf,
    /// Bounded wait for the state lock in milliseconds.
    /// Env override: DAMPER_LOCK_WAIT_MS
    pub lock_wait_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: std::env::temp_dir().join("damper"),
            lock_wait_ms: 50,
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Minimum interval between opportunistic sweeps (default: 10 min)
    pub interval_ms: u64,
    /// Age after which runnerless state files are removed (default: 60 min)
    pub stale_after_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_ms: 600_000,
            stale_after_ms: 3_600_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Enable debug tracing.
    /// Env override: DAMPER_DEBUG
    pub debug: bool,
    /// Redirect log output to a file instead of stderr.
    /// Env override: DAMPER_DEBUG_LOG
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lock for tests that modify environment variables to prevent race
    // conditions when tests run in parallel
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.store.state_dir, std::env::temp_dir().join("damper"));
        assert_eq!(config.store.lock_wait_ms, 50);
        assert_eq!(config.gc.interval_ms, 600_000);
        assert_eq!(config.gc.stale_after_ms, 3_600_000);
        assert!(!config.log.debug);
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let partial = r#"
[store]
lock_wait_ms = 25
"#;
        let config: Config = toml::from_str(partial).unwrap();

        assert_eq!(config.store.lock_wait_ms, 25);
        assert_eq!(config.gc.interval_ms, 600_000);
    }

    #[test]
    fn test_toml_roundtrip_preserves_all_values() {
        let original = Config::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(original.store.state_dir, parsed.store.state_dir);
        assert_eq!(original.store.lock_wait_ms, parsed.store.lock_wait_ms);
        assert_eq!(original.gc.stale_after_ms, parsed.gc.stale_after_ms);
    }

    #[test]
    fn test_env_override_state_dir() {
        let _guard = ENV_LOCK.lock().unwrap(); // Serialize env tests
        let mut config = Config::default();

        std::env::set_var("DAMPER_STATE_DIR", "/env/override/path");
        config.apply_env_overrides();
        std::env::remove_var("DAMPER_STATE_DIR");

        assert_eq!(config.store.state_dir, PathBuf::from("/env/override/path"));
    }

    #[test]
    fn test_env_override_invalid_lock_wait_ignored() {
        let _guard = ENV_LOCK.lock().unwrap(); // Serialize env tests
        let mut config = Config::default();

        std::env::set_var("DAMPER_LOCK_WAIT_MS", "not_a_number");
        config.apply_env_overrides();
        std::env::remove_var("DAMPER_LOCK_WAIT_MS");

        assert_eq!(config.store.lock_wait_ms, 50);
    }

    #[test]
    fn test_env_override_debug_log() {
        let _guard = ENV_LOCK.lock().unwrap(); // Serialize env tests
        let mut config = Config::default();

        std::env::set_var("DAMPER_DEBUG", "1");
        std::env::set_var("DAMPER_DEBUG_LOG", "/tmp/damper-debug.log");
        config.apply_env_overrides();
        std::env::remove_var("DAMPER_DEBUG");
        std::env::remove_var("DAMPER_DEBUG_LOG");

        assert!(config.log.debug);
        assert_eq!(config.log.file, Some(PathBuf::from("/tmp/damper-debug.log")));
    }

    #[test]
    fn test_global_config_path_exists() {
        let path = Config::global_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().ends_with(".damper/config.toml"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let result: Result<Config, _> = toml::from_str("invalid { toml }");
        assert!(result.is_err());
    }
}
