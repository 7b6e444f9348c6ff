//! Spindle Core - decoding policy engine
//!
//! This crate decides, for every step of an autoregressive generation, which
//! token is emitted and when generation stops. The neural forward pass and the
//! tokenizer are external collaborators (see [`session::ForwardPass`] and
//! [`session::Tokenizer`]); everything between a raw score vector and the
//! emitted token lives here.

pub mod config;
pub mod engine;
pub mod generation;
pub mod metrics;
pub mod policy;
pub mod session;
pub mod validation;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Policy or engine configuration outside its declared domain
    #[error("Configuration error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Configuration {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        config_path: Option<std::path::PathBuf>,
        field_name: Option<String>,
        value: Option<String>,
        valid_range: Option<String>,
    },

    /// Misuse of a stateless operation (bad parameter, empty scores, ...)
    #[error("Invalid input [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    InvalidInput {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        parameter_name: Option<String>,
        value: Option<String>,
        valid_range: Option<String>,
    },

    /// A collaborator failed while a session was running
    #[error("Generation error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Generation {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        session_id: Option<String>,
        step: Option<usize>,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// File system and I/O errors
    #[error("IO error [{code}]: {message}\nPath: {path:?}\nSuggestion: {suggestion}")]
    Io {
        code: &'static str,
        message: String,
        path: Option<std::path::PathBuf>,
        suggestion: String,
        #[source]
        source: std::io::Error,
    },

    /// Other unexpected errors
    #[error("Internal error [{code}]: {message}\nContext: {context}")]
    Internal {
        code: &'static str,
        message: String,
        context: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a configuration error for a field outside its valid range
    pub fn configuration_field<S1, S2, S3, S4>(
        code: &'static str,
        message: S1,
        field_name: S2,
        value: S3,
        valid_range: S4,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        let field_name = field_name.into();
        Self::Configuration {
            code,
            message: message.into(),
            context: format!("Validating field '{}'", field_name),
            suggestion: "Adjust the value to fall inside the valid range".to_string(),
            config_path: None,
            field_name: Some(field_name),
            value: Some(value.into()),
            valid_range: Some(valid_range.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            config_path: None,
            field_name: None,
            value: None,
            valid_range: None,
        }
    }

    /// Create an invalid input error
    pub fn invalid_input<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidInput {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: None,
            value: None,
            valid_range: None,
        }
    }

    /// Create an invalid input error with parameter validation details
    pub fn invalid_parameter<S1, S2, S3, S4, S5, S6>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
        param_name: S4,
        value: S5,
        valid_range: S6,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
        S5: Into<String>,
        S6: Into<String>,
    {
        Self::InvalidInput {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: Some(param_name.into()),
            value: Some(value.into()),
            valid_range: Some(valid_range.into()),
        }
    }

    /// Create a generation failure wrapping a collaborator error
    pub fn generation<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Generation {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            session_id: None,
            step: None,
            source: None,
        }
    }

    /// Attach session id and step to a generation failure; other variants pass through
    pub fn at_step(self, id: &str, at: usize) -> Self {
        match self {
            Self::Generation {
                code,
                message,
                context,
                suggestion,
                source,
                ..
            } => Self::Generation {
                code,
                message,
                context,
                suggestion,
                session_id: Some(id.to_string()),
                step: Some(at),
                source,
            },
            other => other,
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { code, .. } => code,
            Self::InvalidInput { code, .. } => code,
            Self::Generation { code, .. } => code,
            Self::Io { code, .. } => code,
            Self::Internal { code, .. } => code,
        }
    }

    /// Whether this error was raised by policy or engine configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Whether this error reports a failed generation session
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, Self::Generation { .. })
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let (code, suggestion) = match err.kind() {
            std::io::ErrorKind::NotFound => (
                "IO_FILE_NOT_FOUND",
                "Check that the file path is correct and the file exists",
            ),
            std::io::ErrorKind::PermissionDenied => (
                "IO_PERMISSION_DENIED",
                "Check file permissions or run with appropriate privileges",
            ),
            std::io::ErrorKind::InvalidData => (
                "IO_INVALID_DATA",
                "The file may be corrupted or in an unexpected format",
            ),
            _ => (
                "IO_UNKNOWN",
                "Check the file system and try the operation again",
            ),
        };

        Self::Io {
            code,
            message: err.to_string(),
            path: None,
            suggestion: suggestion.to_string(),
            source: err,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            code: "INTERNAL_UNKNOWN",
            message: err.to_string(),
            context: "An unexpected error occurred".to_string(),
            source: Some(err),
        }
    }
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        config::{EngineConfig, LoggingConfig, RepetitionGuardConfig},
        engine::{DecodingEngine, ModelArchitecture},
        generation::{
            pipeline::ScoreTransformPipeline,
            repetition::{RepetitionGuard, RepetitionSignal},
            sampler::{softmax, TokenSelector},
            FinishReason, GenerationOutput, GenerationState,
        },
        metrics::{Phase, PerformanceRecorder, PerformanceSnapshot},
        policy::{GenerationPolicy, PolicyParams},
        session::{ForwardPass, GenerationSession, SessionState, StreamingSink, Tokenizer},
        validation::{OutputValidator, ValidationReport, Validator},
        CoreError, Result,
    };
}

// Re-export key types at the crate root
pub use config::EngineConfig;
pub use engine::DecodingEngine;
pub use policy::GenerationPolicy;
pub use session::GenerationSession;

pub mod error {
    pub use super::{CoreError, Result};
}
