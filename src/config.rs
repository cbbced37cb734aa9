//! Configuration management for the pipeline agent
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! ```toml
//! [labelstore]
//! shards = 16
//! stale_duration_secs = 600
//!
//! [relabel.cache]
//! backend = "inmemory"
//!
//! [relabel.cache.in_memory]
//! cache_size = 100000
//!
//! [monitoring]
//! log_level = "info"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::CacheBackend;
use crate::components::RelabelConfig;
use crate::error::{Error, Result};
use crate::labelstore::LabelStoreConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Series identity table
    #[serde(default)]
    pub labelstore: LabelStoreConfig,

    /// Relabel components
    #[serde(default)]
    pub relabel: RelabelConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log filter (error, warn, info, debug, trace or an `EnvFilter` directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dump gathered metrics to the log on shutdown
    #[serde(default)]
    pub log_metrics_on_shutdown: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_metrics_on_shutdown: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    ///
    /// Also returns the overrides that were skipped, see
    /// [`apply_env_overrides`](Self::apply_env_overrides).
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, Vec<RejectedOverride>)> {
        let mut config = Self::from_file(path)?;
        let rejected = config.apply_env_overrides();
        Ok((config, rejected))
    }

    /// Load from environment variables only
    pub fn from_env() -> (Self, Vec<RejectedOverride>) {
        let mut config = Self::default();
        let rejected = config.apply_env_overrides();
        (config, rejected)
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values leave the setting untouched and are returned, so
    /// the caller can report them once logging is up.
    pub fn apply_env_overrides(&mut self) -> Vec<RejectedOverride> {
        let mut rejected = Vec::new();

        // Label store
        if let Some(n) =
            env_override("KUBA_LABELSTORE_SHARDS", &mut rejected, str::parse::<usize>)
        {
            self.labelstore.shards = n;
        }
        if let Some(n) = env_override(
            "KUBA_LABELSTORE_STALE_DURATION_SECS",
            &mut rejected,
            str::parse::<u64>,
        ) {
            self.labelstore.stale_duration_secs = n;
        }

        // Relabel cache
        if let Some(b) =
            env_override("KUBA_CACHE_BACKEND", &mut rejected, str::parse::<CacheBackend>)
        {
            self.relabel.cache.backend = b;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }

        rejected
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.labelstore.validate()?;
        self.relabel.validate()?;
        if self.monitoring.log_level.trim().is_empty() {
            return Err(Error::Configuration("Log level cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }
}

/// An environment variable whose value could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOverride {
    /// Variable name
    pub var: &'static str,
    /// Raw value
    pub value: String,
    /// Parse error
    pub reason: String,
}

/// Read and parse `var`, recording a value that does not parse
fn env_override<T, E, F>(
    var: &'static str,
    rejected: &mut Vec<RejectedOverride>,
    parse: F,
) -> Option<T>
where
    F: FnOnce(&str) -> std::result::Result<T, E>,
    E: std::fmt::Display,
{
    let value = std::env::var(var).ok()?;
    match parse(&value) {
        Ok(v) => Some(v),
        Err(e) => {
            rejected.push(RejectedOverride {
                var,
                reason: e.to_string(),
                value,
            });
            None
        },
    }
}
