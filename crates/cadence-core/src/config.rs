//! Scheduler configuration, loaded from TOML.
//!
//! ```toml
//! database = "/var/lib/cadence/scheduler.db"
//!
//! [log]
//! filter = "info,cadence_core=debug"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// SQLite database file holding tasks, marks and the last-run record.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive. `RUST_LOG` wins when set.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_database() -> PathBuf {
    PathBuf::from("cadence.db")
}

fn default_filter() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            log: LogConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_defaults() {
        assert_eq!(SchedulerConfig::parse("").unwrap(), SchedulerConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = SchedulerConfig::parse(
            r#"
            database = "/tmp/tasks.db"

            [log]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.database, PathBuf::from("/tmp/tasks.db"));
        assert!(config.log.json);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn unknown_types_are_reported() {
        assert!(SchedulerConfig::parse("database = 5").is_err());
    }

    #[test]
    fn missing_files_are_read_errors() {
        let err = SchedulerConfig::load_from(Path::new("/nonexistent/cadence.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
