//! Configuration management for Spindle CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spindle_core::prelude::*;
use std::path::{Path, PathBuf};

/// CLI configuration: the engine settings plus CLI defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Policy used by `replay` when `--policy` is not given
    pub default_policy: Option<PathBuf>,

    /// Engine-wide settings
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from an explicit file, the default location, or defaults
    ///
    /// An explicitly given file must exist; the default location is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_path_buf(),
            None => {
                let default_path = Self::default_config_path();
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load config file: {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse configuration")?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
            .join("spindle")
            .join("config.toml")
    }
}
