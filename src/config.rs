//! Runtime configuration for the converge binary.
//!
//! Values come from (lowest to highest precedence) built-in defaults, an
//! optional TOML or JSON file, and `CONVERGE_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use converge_events::{EventBusConfig, EventNaming};
use converge_reconciler::ControllerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding `log_level`.
pub const ENV_LOG_LEVEL: &str = "CONVERGE_LOG_LEVEL";
/// Environment variable overriding `event_bus.buffer_size`.
pub const ENV_EVENT_BUFFER: &str = "CONVERGE_EVENT_BUFFER";
/// Environment variable overriding `event_bus.dispatch_workers`.
pub const ENV_DISPATCH_WORKERS: &str = "CONVERGE_DISPATCH_WORKERS";
/// Environment variable overriding `controller.workers`.
pub const ENV_WORKERS: &str = "CONVERGE_WORKERS";
/// Environment variable overriding `controller.resync_interval` (ms, `0` disables).
pub const ENV_RESYNC_INTERVAL_MS: &str = "CONVERGE_RESYNC_INTERVAL_MS";

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default event source name.
pub const DEFAULT_SOURCE: &str = "converge";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported config format for {path} (expected .toml or .json)")]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("failed to render configuration: {reason}")]
    Render { reason: String },
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Source stamped on events this process emits.
    pub source: String,
    /// Event bus settings.
    pub event_bus: EventBusConfig,
    /// Controller settings.
    pub controller: ControllerConfig,
    /// Event type prefixes.
    pub naming: EventNaming,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            event_bus: EventBusConfig::default(),
            controller: ControllerConfig::default(),
            naming: EventNaming::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, then `path` if given, then the process environment,
    /// and validate the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any layer fails or validation rejects
    /// the merged configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML or JSON file, chosen by extension.
    ///
    /// # Errors
    ///
    /// Returns `Read`, `Parse` or `UnsupportedFormat`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = Format::from_path(path)?;
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        format.parse(&contents).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Apply `CONVERGE_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEnv` for a value that is not a number where one is
    /// expected.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(size) = parse_env::<usize>(&lookup, ENV_EVENT_BUFFER)? {
            self.event_bus.buffer_size = size;
        }
        if let Some(workers) = parse_env::<usize>(&lookup, ENV_DISPATCH_WORKERS)? {
            self.event_bus.dispatch_workers = workers;
        }
        if let Some(workers) = parse_env::<usize>(&lookup, ENV_WORKERS)? {
            self.controller.workers = workers;
        }
        if let Some(millis) = parse_env::<u64>(&lookup, ENV_RESYNC_INTERVAL_MS)? {
            self.controller.resync_interval = (millis > 0).then(|| Duration::from_millis(millis));
        }
        Ok(())
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(invalid("log_level must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(invalid("source must not be empty"));
        }
        self.event_bus
            .validate()
            .map_err(|e| invalid(format!("event_bus: {e}")))?;
        self.controller
            .validate()
            .map_err(|e| invalid(format!("controller: {e}")))?;
        Ok(())
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Render` if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render {
            reason: e.to_string(),
        })
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            })
        })
        .transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Self::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn parse(self, contents: &str) -> Result<RuntimeConfig, String> {
        match self {
            Self::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
        }
    }
}
