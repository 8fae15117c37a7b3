//! Configuration for strand.
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```toml
//! log_level = "debug"
//!
//! [platform]
//! backend = "auto"
//!
//! [sync]
//! wait_strategy = "backoff"
//! backoff_initial_us = 500
//! backoff_max_ms = 50
//!
//! [threads]
//! default_group_name = "default"
//! name_prefix = "strand"
//! ```

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::logging::LogLevel;
use crate::error::{Error, Result};

/// Which platform adapter applies priorities and affinities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformBackend {
    /// Probe the running platform and pick the best adapter
    #[default]
    Auto,

    /// Native POSIX scheduler calls (Linux only)
    Posix,

    /// Record priorities and affinities without applying them
    Noop,
}

/// Platform configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Adapter selection
    #[serde(default)]
    pub backend: PlatformBackend,
}

/// How a timed lock waits for its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategyKind {
    /// Park on a condition variable with a native deadline
    #[default]
    Parking,

    /// Retry with exponential backoff sleeps
    Backoff,
}

/// Synchronization primitive configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Wait strategy for timed locks
    #[serde(default)]
    pub wait_strategy: WaitStrategyKind,

    /// First backoff delay (microseconds)
    #[serde(default = "default_backoff_initial_us")]
    pub backoff_initial_us: u64,

    /// Backoff delay cap (milliseconds)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_backoff_initial_us() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    50
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            wait_strategy: WaitStrategyKind::default(),
            backoff_initial_us: default_backoff_initial_us(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl SyncConfig {
    /// First backoff delay.
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_micros(self.backoff_initial_us)
    }

    /// Backoff delay cap.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Thread management configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadsConfig {
    /// Name of the process-wide default thread group
    #[serde(default = "default_group_name")]
    pub default_group_name: String,

    /// Prefix for generated thread names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_group_name() -> String {
    "default".to_string()
}

fn default_name_prefix() -> String {
    "strand".to_string()
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            default_group_name: default_group_name(),
            name_prefix: default_name_prefix(),
        }
    }
}

/// Top-level strand configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrandConfig {
    /// Maximum verbosity passed to the `log` facade
    #[serde(default)]
    pub log_level: LogLevel,

    /// Platform adapter configuration
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Synchronization primitive configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Thread management configuration
    #[serde(default)]
    pub threads: ThreadsConfig,
}

impl StrandConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StrandConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Configuration file not found: {}", path.display());
            return Ok(Self::default());
        }

        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sync.backoff_initial_us == 0 {
            return Err(Error::Config(
                "Backoff initial delay cannot be zero".to_string(),
            ));
        }

        if self.sync.backoff_max() < self.sync.backoff_initial() {
            return Err(Error::Config(format!(
                "Backoff cap {}ms is below the initial delay {}us",
                self.sync.backoff_max_ms, self.sync.backoff_initial_us
            )));
        }

        if self.threads.default_group_name.is_empty() {
            return Err(Error::Config(
                "Default group name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
