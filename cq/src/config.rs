//! CronQ configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use jobstore::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::worker::WorkerConfig;

/// Main CronQ configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage locations
    pub storage: StorageConfig,

    /// Worker pool settings
    pub workers: WorkerConfig,

    /// Default retry policy for registrations that do not specify one
    pub retry: RetryConfig,

    /// Shutdown and sweep timing
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If an explicit config path is provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .cronq.yml
        let local_config = PathBuf::from(".cronq.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/cronq/cronq.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cronq").join("cronq.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the job store database
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/cronq on Linux)
        let data_dir = dirs::data_dir()
            .map(|d| d.join("cronq"))
            .unwrap_or_else(|| PathBuf::from(".cronq"));
        Self { data_dir }
    }
}

/// Default retry policy applied to registrations without an explicit one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(flatten)]
    pub policy: RetryPolicy,
}

/// Shutdown and sweep timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Graceful shutdown deadline in seconds
    #[serde(rename = "shutdown-timeout-secs")]
    pub shutdown_timeout_secs: u64,

    /// Interval between lease-expiry sweeps in milliseconds
    #[serde(rename = "sweep-interval-ms")]
    pub sweep_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
            sweep_interval_ms: 5_000,
        }
    }
}
