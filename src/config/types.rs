//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where stored monitor configurations live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// File that confirmed configurations are written to
    /// (None = `monitors.xml` in the user config directory)
    #[serde(default)]
    pub user_path: Option<PathBuf>,

    /// Read-only files tried after the user file, in order
    /// (None = `monitors.xml` in each of `$XDG_CONFIG_DIRS`)
    #[serde(default)]
    pub system_paths: Option<Vec<PathBuf>>,
}

/// Confirmation transaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Seconds before an unconfirmed change is reverted
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_confirmation_timeout_secs() -> u64 {
    20
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

/// Layout synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Extend a stored layout when a single monitor is added
    #[serde(default = "default_allow_extend")]
    pub allow_extend: bool,
}

fn default_allow_extend() -> bool {
    true
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            allow_extend: default_allow_extend(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files (None = console only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}
