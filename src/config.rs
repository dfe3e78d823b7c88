//! Application configuration.
//!
//! Loaded from a JSON file (missing file means defaults), then overridden from
//! `FA_DATABASE_URL`, `FA_MAX_EXECUTION_TIME` and `FA_LOG_LEVEL`.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// An environment override has an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Script engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget per evaluation, in seconds.
    pub max_execution_time_secs: f64,
    /// Maximum nesting of script function calls.
    pub max_recursion_depth: usize,
    /// Register the JSON and time API blocks.
    pub enable_apis: bool,
    /// When set, only these tools are visible to scripts.
    pub allowed_tools: Option<BTreeSet<String>>,
    /// Hide every tool.
    pub deny_all_tools: bool,
    /// Echo script output to stderr as well as the log.
    pub debug_print: bool,
    /// Bound on each sync-to-async bridge call, in seconds.
    pub bridge_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_time_secs: 600.0,
            max_recursion_depth: 200,
            enable_apis: true,
            allowed_tools: None,
            deny_all_tools: false,
            debug_print: false,
            bridge_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Execution budget as a [`Duration`]. Invalid values fall back to the default.
    pub fn max_execution_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_execution_time_secs)
            .unwrap_or_else(|_| Duration::from_secs(600))
    }

    /// Bridge bound as a [`Duration`].
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}

/// Database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLx connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
    /// SQLite busy timeout.
    pub busy_timeout_secs: u64,
    /// Attempts per statement, including the first.
    pub max_retries: u32,
    /// Base backoff delay.
    pub base_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://family_assistant.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Script engine.
    pub engine: EngineConfig,
    /// Database.
    pub database: DatabaseConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("FA_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(value) = lookup("FA_MAX_EXECUTION_TIME") {
            self.engine.max_execution_time_secs = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "FA_MAX_EXECUTION_TIME",
                    value,
                })?;
        }
        if let Some(level) = lookup("FA_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(dir.path().join("absent.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.engine.max_execution_time(), Duration::from_secs(600));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"engine": {"max_execution_time_secs": 2.5, "allowed_tools": ["get_note"]}}"#,
        )
        .expect("write");
        let config = AppConfig::load(&path).expect("load");
        assert_eq!(config.engine.max_execution_time(), Duration::from_millis(2500));
        assert_eq!(config.engine.max_recursion_depth, 200);
        assert!(config.engine.allowed_tools.expect("allow-list").contains("get_note"));
        assert_eq!(config.database.max_retries, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("FA_DATABASE_URL", "sqlite::memory:"),
            ("FA_MAX_EXECUTION_TIME", "12"),
            ("FA_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.engine.max_execution_time_secs, 12.0);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_execution_time_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|var| (var == "FA_MAX_EXECUTION_TIME").then(|| "soon".to_string()))
            .expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
