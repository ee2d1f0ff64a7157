//! Configuration for Sunlight.
//!
//! Everything lives in one TOML file, by default `~/.sunlight/config.toml`.
//! A missing file means defaults; a present file only needs the keys it
//! wants to change.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding the Sunlight home directory.
pub const HOME_ENV: &str = "SUNLIGHT_HOME";

/// 30 days of minutes.
pub const DEFAULT_MAX_SPAN_MINUTES: u32 = 30 * 24 * 60;
pub const DEFAULT_MERGE_BATCH_ROWS: usize = 5_000;

/// A window must cover at least two minutes or it can never advance: the
/// first minute is always the one recomputed from the previous run.
pub const MIN_SPAN_MINUTES: u32 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How readings in the same (minute, sensor) bucket collapse to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Arithmetic mean of every valid reading in the minute.
    #[default]
    Mean,
    /// The earliest reading by timestamp.
    FirstArrival,
}

impl fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationPolicy::Mean => write!(f, "mean"),
            AggregationPolicy::FirstArrival => write!(f, "first_arrival"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownsampleConfig {
    /// Upper bound on the width of one run's window, in minutes.
    #[serde(default = "default_max_span_minutes")]
    pub max_span_minutes: u32,

    #[serde(default)]
    pub aggregation: AggregationPolicy,

    /// Rows per upsert batch.
    #[serde(default = "default_merge_batch_rows")]
    pub merge_batch_rows: usize,
}

fn default_max_span_minutes() -> u32 {
    DEFAULT_MAX_SPAN_MINUTES
}

fn default_merge_batch_rows() -> usize {
    DEFAULT_MERGE_BATCH_ROWS
}

impl Default for DownsampleConfig {
    fn default() -> Self {
        Self {
            max_span_minutes: default_max_span_minutes(),
            aggregation: AggregationPolicy::default(),
            merge_batch_rows: default_merge_batch_rows(),
        }
    }
}

impl DownsampleConfig {
    pub fn max_span(&self) -> Duration {
        Duration::minutes(i64::from(self.max_span_minutes))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_span_minutes < MIN_SPAN_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "downsample.max_span_minutes must be at least {}, got {}",
                MIN_SPAN_MINUTES, self.max_span_minutes
            )));
        }
        if self.merge_batch_rows == 0 {
            return Err(ConfigError::Invalid(
                "downsample.merge_batch_rows must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default = "default_warehouse_path")]
    pub path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: default_warehouse_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files. Defaults to `<home>/logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_logs_dir)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunlightConfig {
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub downsample: DownsampleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SunlightConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SunlightConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.downsample.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Root directory for Sunlight state.
///
/// `SUNLIGHT_HOME` wins; otherwise `~/.sunlight`, or `./.sunlight` when no
/// home directory can be determined.
pub fn sunlight_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|home| home.join(".sunlight"))
        .unwrap_or_else(|| PathBuf::from(".sunlight"))
}

pub fn default_config_path() -> PathBuf {
    sunlight_home().join("config.toml")
}

pub fn default_warehouse_path() -> PathBuf {
    sunlight_home().join("sunlight.duckdb")
}

pub fn default_logs_dir() -> PathBuf {
    sunlight_home().join("logs")
}
