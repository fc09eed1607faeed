//! Configuration module for Kojible
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/kojible/kojible.toml)
//! - User configuration (~/.config/kojible/kojible.toml)
//! - Project configuration (./kojible.toml)
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::modules::{ModuleContext, PROFILE_ENV};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hub profile used by tasks that do not set `koji`
    pub profile: Option<String>,

    /// Default run flags
    pub defaults: Defaults,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Default run flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Report changes without making them
    pub check_mode: bool,

    /// Attach before/after diffs to module output
    pub diff_mode: bool,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest priority first
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        let mut paths = vec![PathBuf::from("/etc/kojible/kojible.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("kojible").join("kojible.toml"));
        }
        paths.push(PathBuf::from("kojible.toml"));

        if let Ok(env_config) = std::env::var("KOJIBLE_CONFIG") {
            paths.insert(0, PathBuf::from(env_config));
        }
        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; set values in `other` win
    fn merge(&self, other: Config) -> Config {
        let defaults = LoggingConfig::default();
        Config {
            profile: other.profile.or_else(|| self.profile.clone()),
            defaults: Defaults {
                check_mode: other.defaults.check_mode || self.defaults.check_mode,
                diff_mode: other.defaults.diff_mode || self.defaults.diff_mode,
            },
            logging: LoggingConfig {
                level: if other.logging.level != defaults.level {
                    other.logging.level
                } else {
                    self.logging.level.clone()
                },
                json: other.logging.json || self.logging.json,
            },
        }
    }

    /// Apply environment variable overrides
    ///
    /// `KOJI_PROFILE` only fills in a profile that no file set.
    fn apply_env_overrides(&mut self) {
        if self.profile.is_none() {
            self.profile = std::env::var(PROFILE_ENV).ok().filter(|p| !p.is_empty());
        }

        if let Some(check_mode) = env_flag("KOJIBLE_CHECK_MODE") {
            self.defaults.check_mode = check_mode;
        }

        if let Some(diff_mode) = env_flag("KOJIBLE_DIFF") {
            self.defaults.diff_mode = diff_mode;
        }

        if let Ok(level) = std::env::var("KOJIBLE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Load from a specific file, ignoring the standard locations
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }

    /// A module context carrying the configured flags and profile.
    ///
    /// The caller still has to attach a session provider.
    pub fn context(&self) -> ModuleContext {
        let context = ModuleContext::new()
            .with_check_mode(self.defaults.check_mode)
            .with_diff_mode(self.defaults.diff_mode);
        match &self.profile {
            Some(profile) => context.with_profile(profile.clone()),
            None => context,
        }
    }
}
