//! Configuration management
//!
//! Handles loading, validation, and merging of daemon settings from:
//! - TOML files
//! - Environment variables (`XDG_CONFIG_DIRS`)
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::multimon::MultiMonitorConfig;

pub mod types;

pub use types::{LayoutConfig, LoggingConfig, StoreConfig, TransactionConfig};

/// File name of the persisted monitor configuration
pub const MONITORS_FILE: &str = "monitors.xml";

/// Longest allowed confirmation timeout, in seconds
pub const MAX_CONFIRMATION_TIMEOUT_SECS: u64 = 600;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Configuration store locations
    #[serde(default)]
    pub store: StoreConfig,
    /// Confirmation transaction
    #[serde(default)]
    pub transaction: TransactionConfig,
    /// Layout synthesis
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let timeout = self.transaction.confirmation_timeout_secs;
        if !(1..=MAX_CONFIRMATION_TIMEOUT_SECS).contains(&timeout) {
            anyhow::bail!(
                "confirmation_timeout_secs ({}) must be between 1 and {}",
                timeout,
                MAX_CONFIRMATION_TIMEOUT_SECS
            );
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        if let Some(path) = &self.store.user_path {
            if path.as_os_str().is_empty() {
                anyhow::bail!("store.user_path cannot be empty");
            }
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, store: Option<PathBuf>, log_dir: Option<PathBuf>) -> Self {
        if let Some(path) = store {
            self.store.user_path = Some(path);
        }
        if let Some(dir) = log_dir {
            self.logging.log_dir = Some(dir);
        }

        self
    }

    /// File confirmed configurations are saved to
    pub fn user_store_path(&self) -> PathBuf {
        self.store.user_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(MONITORS_FILE)
        })
    }

    /// Files to load the store from, in search order
    ///
    /// The user file comes first; the first one that parses wins.
    pub fn store_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.user_store_path()];

        match &self.store.system_paths {
            Some(system) => paths.extend(system.iter().cloned()),
            None => {
                let dirs = std::env::var("XDG_CONFIG_DIRS").unwrap_or_default();
                paths.extend(system_store_paths(&dirs));
            }
        }

        paths
    }

    /// Convert to the monitor manager's settings
    pub fn to_multimon_config(&self) -> MultiMonitorConfig {
        MultiMonitorConfig {
            confirmation_timeout: Duration::from_secs(self.transaction.confirmation_timeout_secs),
            allow_extend: self.layout.allow_extend,
        }
    }
}

/// `monitors.xml` under each entry of a colon-separated directory list
///
/// An empty list means `/etc/xdg`.
fn system_store_paths(xdg_config_dirs: &str) -> Vec<PathBuf> {
    let dirs: Vec<&str> = xdg_config_dirs.split(':').filter(|d| !d.is_empty()).collect();
    let dirs = if dirs.is_empty() { vec!["/etc/xdg"] } else { dirs };

    dirs.into_iter()
        .map(|dir| Path::new(dir).join(MONITORS_FILE))
        .collect()
}
