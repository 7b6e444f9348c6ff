//! Input and output validation utilities for Spindle Core
//!
//! [`Validator`] holds the range checks shared by [`GenerationPolicy`] and
//! [`EngineConfig`], so every rejected field reports its name, the offending
//! value and the valid range the same way. [`OutputValidator`] inspects final
//! generated text for quality problems.
//!
//! [`GenerationPolicy`]: crate::policy::GenerationPolicy
//! [`EngineConfig`]: crate::config::EngineConfig

use crate::{CoreError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

/// Validation utilities for common operations
pub struct Validator;

impl Validator {
    /// Check that a float lies in the closed interval `[min, max]`
    pub fn check_f32_range(
        code: &'static str,
        field: &str,
        value: f32,
        min: f32,
        max: f32,
    ) -> Result<()> {
        // NaN fails both comparisons, so it is rejected here too
        if value >= min && value <= max {
            return Ok(());
        }
        let range = format!("[{:?}, {:?}]", min, max);
        Err(CoreError::configuration_field(
            code,
            format!("{} must be in range {}, got: {}", field, range, value),
            field,
            value.to_string(),
            range,
        ))
    }

    /// Check that an integer lies in the closed interval `[min, max]`
    pub fn check_int_range(
        code: &'static str,
        field: &str,
        value: i64,
        min: i64,
        max: i64,
    ) -> Result<()> {
        if value >= min && value <= max {
            return Ok(());
        }
        let range = format!("[{}, {}]", min, max);
        Err(CoreError::configuration_field(
            code,
            format!("{} must be in range {}, got: {}", field, range, value),
            field,
            value.to_string(),
            range,
        ))
    }

    /// Check that an integer is strictly positive and at most `max`
    pub fn check_positive_int(code: &'static str, field: &str, value: i64, max: i64) -> Result<()> {
        if value > 0 && value <= max {
            return Ok(());
        }
        let range = format!("(0, {}]", max);
        Err(CoreError::configuration_field(
            code,
            format!("{} must be in range {}, got: {}", field, range, value),
            field,
            value.to_string(),
            range,
        ))
    }

    /// Validate a parameter passed to a stateless operation (not a config field)
    pub fn check_parameter(
        code: &'static str,
        ok: bool,
        parameter: &str,
        value: impl ToString,
        valid_range: &str,
        context: &str,
    ) -> Result<()> {
        if ok {
            return Ok(());
        }
        let value = value.to_string();
        Err(CoreError::invalid_parameter(
            code,
            format!("{} must be in range {}, got: {}", parameter, valid_range, value),
            context,
            "Fix the argument before calling this operation",
            parameter,
            value,
            valid_range,
        ))
    }
}

lazy_static! {
    /// Five or more consecutive digits, a common symptom of leaked token ids
    static ref TOKEN_ID_PATTERN: Regex = Regex::new(r"\b\d{5,}\b").expect("valid regex");
    static ref EXCESSIVE_WHITESPACE: Regex = Regex::new(r"\s{10,}").expect("valid regex");
    /// Control characters other than tab, newline and carriage return
    static ref CONTROL_CHARS: Regex =
        Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("valid regex");
}

const MIN_LETTER_RATIO: f64 = 0.20;

/// Outcome of validating generated text
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// True when no errors were found (warnings are allowed)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn invalid(error: &str) -> Self {
        Self {
            errors: vec![error.to_string()],
            warnings: Vec::new(),
        }
    }
}

/// Quality checks for final generated text
#[derive(Debug, Clone)]
pub struct OutputValidator {
    min_output_length: usize,
    max_output_length: usize,
    strict: bool,
}

impl Default for OutputValidator {
    fn default() -> Self {
        Self::new(1, 100_000, false)
    }
}

impl OutputValidator {
    /// Create a validator; in strict mode control characters and digit runs are errors
    pub fn new(min_output_length: usize, max_output_length: usize, strict: bool) -> Self {
        Self {
            min_output_length,
            max_output_length,
            strict,
        }
    }

    /// Validate generated text
    pub fn validate(&self, output: &str) -> ValidationReport {
        if output.is_empty() {
            return ValidationReport::invalid("Output is empty");
        }
        if output.trim().is_empty() {
            return ValidationReport::invalid("Output is whitespace-only");
        }

        let mut report = ValidationReport::default();
        let length = output.chars().count();

        if length < self.min_output_length {
            report.errors.push(format!(
                "Output too short: {} < {} (minimum)",
                length, self.min_output_length
            ));
        }
        if length > self.max_output_length {
            report.errors.push(format!(
                "Output too long: {} > {} (maximum)",
                length, self.max_output_length
            ));
        }

        // Lossy detokenization leaves replacement characters behind
        if output.contains(char::REPLACEMENT_CHARACTER) {
            report
                .errors
                .push("Output contains invalid UTF-8 sequences".to_string());
        }

        if CONTROL_CHARS.is_match(output) {
            if self.strict {
                report
                    .errors
                    .push("Output contains invalid control characters".to_string());
            } else {
                report
                    .warnings
                    .push("Output contains control characters (may be intentional)".to_string());
            }
        }

        if TOKEN_ID_PATTERN.is_match(output) {
            if self.strict {
                report.errors.push(
                    "Output contains sequences of 5+ digits (potential token ID leakage)"
                        .to_string(),
                );
            } else {
                report
                    .warnings
                    .push("Potential token ID leakage: 5+ consecutive digits detected".to_string());
            }
        }

        if EXCESSIVE_WHITESPACE.is_match(output) {
            report
                .warnings
                .push("Excessive whitespace detected (10+ consecutive spaces)".to_string());
        }

        let letters = output.chars().filter(|c| c.is_alphabetic()).count();
        let ratio = letters as f64 / length as f64;
        if ratio < MIN_LETTER_RATIO {
            report.warnings.push(format!(
                "Output readability low: only {:.1}% letters (minimum {:.0}% recommended)",
                ratio * 100.0,
                MIN_LETTER_RATIO * 100.0
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_range_boundaries() {
        assert!(Validator::check_f32_range("T", "temperature", 0.0, 0.0, 2.0).is_ok());
        assert!(Validator::check_f32_range("T", "temperature", 2.0, 0.0, 2.0).is_ok());
        assert!(Validator::check_f32_range("T", "temperature", f32::NAN, 0.0, 2.0).is_err());

        let err = Validator::check_f32_range("T", "temperature", 2.1, 0.0, 2.0).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("temperature"));
        assert!(text.contains("2.1"));
        assert!(text.contains("[0.0, 2.0]"));
    }

    #[test]
    fn test_positive_int() {
        assert!(Validator::check_positive_int("M", "max_output_tokens", 1, 4096).is_ok());
        assert!(Validator::check_positive_int("M", "max_output_tokens", 4096, 4096).is_ok());
        let err = Validator::check_positive_int("M", "max_output_tokens", 0, 4096).unwrap_err();
        assert!(err.to_string().contains("(0, 4096]"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_check_parameter_is_invalid_input() {
        let err = Validator::check_parameter("BAD", false, "k", 0, "[1, vocab_size]", "top-k")
            .unwrap_err();
        assert_eq!(err.code(), "BAD");
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[test]
    fn test_output_validator_clean_text() {
        let report = OutputValidator::default().validate("The quick brown fox jumps.");
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_output_validator_empty_and_whitespace() {
        let validator = OutputValidator::default();
        assert!(!validator.validate("").is_valid());
        assert!(!validator.validate("   \n\t").is_valid());
    }

    #[test]
    fn test_output_validator_token_leakage() {
        let lenient = OutputValidator::default().validate("hello 123456 world");
        assert!(lenient.is_valid());
        assert_eq!(lenient.warnings.len(), 1);

        let strict = OutputValidator::new(1, 1000, true).validate("hello 123456 world");
        assert!(!strict.is_valid());
    }

    #[test]
    fn test_output_validator_readability_and_length() {
        let report = OutputValidator::default().validate("1 2 3 4 5 6 7 8");
        assert!(report.warnings.iter().any(|w| w.contains("readability")));

        let report = OutputValidator::new(50, 100, false).validate("short text");
        assert!(!report.is_valid());
    }
}
