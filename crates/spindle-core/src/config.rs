//! Configuration for the decoding engine

use crate::{validation::Validator, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine-wide settings shared by every session the engine creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Token ids never chosen by greedy selection
    ///
    /// Defaults to the first four vocabulary slots, which some quantized
    /// encoder-decoder exports inflate for their control tokens.
    pub excluded_token_ids: Vec<u32>,

    /// Repetition guard settings, `None` disables early stopping on repetition
    pub repetition_guard: Option<RepetitionGuardConfig>,

    /// Run output quality checks on the final text
    pub validate_output: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            excluded_token_ids: vec![0, 1, 2, 3],
            repetition_guard: Some(RepetitionGuardConfig::default()),
            validate_output: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Parameters of the repetition guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionGuardConfig {
    /// Length of the token window being tracked
    pub sequence_length: usize,
    /// Occurrences allowed before the window counts as pathological
    pub repetition_threshold: usize,
}

impl Default for RepetitionGuardConfig {
    fn default() -> Self {
        Self {
            sequence_length: 5,
            repetition_threshold: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::Configuration {
            code: "CONFIG_PARSE_ERROR",
            message: format!("Failed to parse engine configuration: {}", e),
            context: "Reading TOML engine configuration".to_string(),
            suggestion: "Check the configuration file syntax and field names".to_string(),
            config_path: Some(path.to_path_buf()),
            field_name: None,
            value: None,
            valid_range: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CoreError::configuration(
                "CONFIG_SERIALIZE_ERROR",
                format!("Failed to serialize engine configuration: {}", e),
                "Writing TOML engine configuration",
                "Report this as a bug",
            )
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(guard) = &self.repetition_guard {
            Validator::check_int_range(
                "GUARD_SEQUENCE_LENGTH_OUT_OF_RANGE",
                "repetition_guard.sequence_length",
                guard.sequence_length as i64,
                2,
                i64::from(u32::MAX),
            )?;
            Validator::check_int_range(
                "GUARD_THRESHOLD_OUT_OF_RANGE",
                "repetition_guard.repetition_threshold",
                guard.repetition_threshold as i64,
                2,
                i64::from(u32::MAX),
            )?;
        }
        Ok(())
    }
}
