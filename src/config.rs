//! Configuration management
//!
//! This module handles loading and managing configuration from:
//! - Command-line arguments
//! - Configuration files (TOML)
//! - Defaults

use crate::backend::MockSettings;
use crate::diagram::DEFAULT_HIGHLIGHT_CLASS;
use crate::error::{Error, Result};
use crate::store::file::default_store_path;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub diagram: DiagramConfig,

    #[serde(default)]
    pub mock: MockSettings,
}

/// Session persistence and page context
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Where machine states are persisted between runs
    pub store_path: Option<PathBuf>,

    /// URL of the simulated page load
    #[serde(default)]
    pub current_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Structured log file, one JSON entry per line
    pub file: Option<PathBuf>,
}

/// Diagram rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagramConfig {
    /// Class toggled on the highlighted box and arrow
    #[serde(default = "default_highlight_class")]
    pub highlight_class: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_highlight_class() -> String {
    DEFAULT_HIGHLIGHT_CLASS.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            highlight_class: default_highlight_class(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file {:?}: {}", path, e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. ./config.toml
    /// 2. ~/.auth-state-viz/config.toml
    /// 3. /etc/auth-state-viz/config.toml
    pub fn load() -> Result<Self> {
        let paths = vec![
            PathBuf::from("config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".auth-state-viz").join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("/dev/null")),
            PathBuf::from("/etc/auth-state-viz/config.toml"),
        ];

        for path in paths {
            if path.is_file() {
                tracing::info!("Loading config from {:?}", path);
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Session store path with fallback to the user data directory
    pub fn store_path(&self) -> PathBuf {
        self.session
            .store_path
            .clone()
            .unwrap_or_else(default_store_path)
    }
}
