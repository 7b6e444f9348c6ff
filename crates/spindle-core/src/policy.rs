//! Generation policy: the validated, immutable decoding configuration of one request
//!
//! A policy only exists in a valid state. [`GenerationPolicy::create`] checks
//! every field and the cross-field invariants and either returns the policy or
//! a [`CoreError::Configuration`] naming the field, its value and its range.
//! Deserialization goes through the same constructor.

use crate::{validation::Validator, CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Named construction fields for [`GenerationPolicy`]
///
/// Integer fields are signed so that negative input is reported as a range
/// violation instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyParams {
    /// Sampling temperature, 0.0 selects greedy decoding
    pub temperature: f32,
    pub top_k: i64,
    /// Nucleus threshold, 0.0 disables nucleus sampling
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub max_output_tokens: i64,
    pub min_output_tokens: i64,
    /// Token sequences whose completion must never be generated
    pub banned_sequences: Option<Vec<Vec<i64>>>,
    pub num_beams: i64,
    pub length_penalty: f32,
    pub early_stopping: bool,
    pub num_return_sequences: i64,
    /// Seed for the sampling RNG; `None` draws from entropy
    pub seed: Option<u64>,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 50,
            top_p: 0.9,
            repetition_penalty: 1.0,
            max_output_tokens: 512,
            min_output_tokens: 0,
            banned_sequences: None,
            num_beams: 1,
            length_penalty: 1.0,
            early_stopping: true,
            num_return_sequences: 1,
            seed: None,
        }
    }
}

/// Beam-search parameters, validated with the policy but not used by the
/// single-sequence session loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BeamSearchParams {
    pub num_beams: usize,
    pub length_penalty: f32,
    pub early_stopping: bool,
    pub num_return_sequences: usize,
}

/// Immutable decoding configuration for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolicyParams", into = "PolicyParams")]
pub struct GenerationPolicy {
    temperature: f32,
    top_k: usize,
    top_p: f32,
    repetition_penalty: f32,
    max_output_tokens: usize,
    min_output_tokens: usize,
    banned_sequences: Vec<Vec<i64>>,
    beam: BeamSearchParams,
    seed: Option<u64>,
}

impl GenerationPolicy {
    /// Validate every field and build the policy
    pub fn create(params: PolicyParams) -> Result<Self> {
        Validator::check_f32_range(
            "TEMPERATURE_OUT_OF_RANGE",
            "temperature",
            params.temperature,
            0.0,
            2.0,
        )?;
        Validator::check_int_range("TOP_K_OUT_OF_RANGE", "top_k", params.top_k, 1, 100)?;
        Validator::check_f32_range("TOP_P_OUT_OF_RANGE", "top_p", params.top_p, 0.0, 1.0)?;
        Validator::check_f32_range(
            "REPETITION_PENALTY_OUT_OF_RANGE",
            "repetition_penalty",
            params.repetition_penalty,
            1.0,
            2.0,
        )?;
        Validator::check_positive_int(
            "MAX_OUTPUT_TOKENS_OUT_OF_RANGE",
            "max_output_tokens",
            params.max_output_tokens,
            4096,
        )?;
        Validator::check_int_range(
            "MIN_OUTPUT_TOKENS_OUT_OF_RANGE",
            "min_output_tokens",
            params.min_output_tokens,
            0,
            params.max_output_tokens,
        )?;
        Validator::check_int_range("NUM_BEAMS_OUT_OF_RANGE", "num_beams", params.num_beams, 1, 16)?;
        Validator::check_f32_range(
            "LENGTH_PENALTY_OUT_OF_RANGE",
            "length_penalty",
            params.length_penalty,
            0.0,
            2.0,
        )?;
        Validator::check_int_range(
            "NUM_RETURN_SEQUENCES_OUT_OF_RANGE",
            "num_return_sequences",
            params.num_return_sequences,
            1,
            params.num_beams,
        )?;

        let banned_sequences = params.banned_sequences.unwrap_or_default();
        if let Some(index) = banned_sequences.iter().position(|seq| seq.is_empty()) {
            return Err(CoreError::configuration_field(
                "BANNED_SEQUENCE_EMPTY",
                format!(
                    "banned_sequences[{}] must contain at least one token id, got: []",
                    index
                ),
                "banned_sequences",
                "[]",
                "non-empty token id sequences",
            ));
        }

        // Ranges were checked above, the casts cannot truncate
        Ok(Self {
            temperature: params.temperature,
            top_k: params.top_k as usize,
            top_p: params.top_p,
            repetition_penalty: params.repetition_penalty,
            max_output_tokens: params.max_output_tokens as usize,
            min_output_tokens: params.min_output_tokens as usize,
            banned_sequences,
            beam: BeamSearchParams {
                num_beams: params.num_beams as usize,
                length_penalty: params.length_penalty,
                early_stopping: params.early_stopping,
                num_return_sequences: params.num_return_sequences as usize,
            },
            seed: params.seed,
        })
    }

    /// Parse and validate a policy from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let params: PolicyParams = toml::from_str(content).map_err(|e| {
            CoreError::configuration(
                "POLICY_PARSE_ERROR",
                format!("Failed to parse generation policy: {}", e),
                "Reading TOML policy",
                "Check the policy file syntax and field names",
            )
        })?;
        Self::create(params)
    }

    /// Load and validate a policy from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match CoreError::from(e) {
            CoreError::Io {
                code,
                message,
                suggestion,
                source,
                ..
            } => CoreError::Io {
                code,
                message,
                path: Some(path.to_path_buf()),
                suggestion,
                source,
            },
            other => other,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn repetition_penalty(&self) -> f32 {
        self.repetition_penalty
    }

    pub fn max_output_tokens(&self) -> usize {
        self.max_output_tokens
    }

    pub fn min_output_tokens(&self) -> usize {
        self.min_output_tokens
    }

    pub fn banned_sequences(&self) -> &[Vec<i64>] {
        &self.banned_sequences
    }

    pub fn beam_search(&self) -> &BeamSearchParams {
        &self.beam
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Temperature 0.0 means deterministic argmax selection
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }

    /// Always true for a validated policy, since `top_k` is at least 1
    ///
    /// A `top_k` at or above the vocabulary size keeps every candidate.
    pub fn uses_top_k(&self) -> bool {
        self.top_k > 0
    }

    /// Nucleus threshold is set; selection only applies it when top-k is off
    pub fn uses_top_p(&self) -> bool {
        self.top_p > 0.0
    }

    pub fn has_repetition_penalty(&self) -> bool {
        self.repetition_penalty != 1.0
    }

    pub fn has_min_length(&self) -> bool {
        self.min_output_tokens > 0
    }

    pub fn has_banned_sequences(&self) -> bool {
        !self.banned_sequences.is_empty()
    }

    pub fn is_beam_search(&self) -> bool {
        self.beam.num_beams > 1
    }
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        let defaults = PolicyParams::default();
        Self {
            temperature: defaults.temperature,
            top_k: defaults.top_k as usize,
            top_p: defaults.top_p,
            repetition_penalty: defaults.repetition_penalty,
            max_output_tokens: defaults.max_output_tokens as usize,
            min_output_tokens: defaults.min_output_tokens as usize,
            banned_sequences: Vec::new(),
            beam: BeamSearchParams {
                num_beams: defaults.num_beams as usize,
                length_penalty: defaults.length_penalty,
                early_stopping: defaults.early_stopping,
                num_return_sequences: defaults.num_return_sequences as usize,
            },
            seed: None,
        }
    }
}

impl TryFrom<PolicyParams> for GenerationPolicy {
    type Error = CoreError;

    fn try_from(params: PolicyParams) -> Result<Self> {
        Self::create(params)
    }
}

impl From<GenerationPolicy> for PolicyParams {
    fn from(policy: GenerationPolicy) -> Self {
        Self {
            temperature: policy.temperature,
            top_k: policy.top_k as i64,
            top_p: policy.top_p,
            repetition_penalty: policy.repetition_penalty,
            max_output_tokens: policy.max_output_tokens as i64,
            min_output_tokens: policy.min_output_tokens as i64,
            banned_sequences: Some(policy.banned_sequences),
            num_beams: policy.beam.num_beams as i64,
            length_penalty: policy.beam.length_penalty,
            early_stopping: policy.beam.early_stopping,
            num_return_sequences: policy.beam.num_return_sequences as i64,
            seed: policy.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(f: impl FnOnce(&mut PolicyParams)) -> Result<GenerationPolicy> {
        let mut params = PolicyParams::default();
        f(&mut params);
        GenerationPolicy::create(params)
    }

    #[test]
    fn test_default_policy() {
        let policy = GenerationPolicy::create(PolicyParams::default()).unwrap();
        assert_eq!(policy, GenerationPolicy::default());
        assert_eq!(policy.max_output_tokens(), 512);
        assert!(!policy.is_greedy());
        assert!(!policy.has_repetition_penalty());
        assert!(!policy.has_banned_sequences());
        assert!(!policy.is_beam_search());
    }

    #[test]
    fn test_temperature_boundaries() {
        assert!(with(|p| p.temperature = 2.0).is_ok());
        assert!(with(|p| p.temperature = 0.0).unwrap().is_greedy());

        for bad in [2.1f32, -0.1] {
            let err = with(|p| p.temperature = bad).unwrap_err();
            assert!(err.is_configuration());
            assert!(err.to_string().contains("[0.0, 2.0]"), "{}", err);
            assert!(err.to_string().contains("temperature"));
        }
    }

    #[test]
    fn test_min_max_output_tokens() {
        assert!(with(|p| {
            p.min_output_tokens = 100;
            p.max_output_tokens = 100;
        })
        .is_ok());

        let err = with(|p| {
            p.min_output_tokens = 101;
            p.max_output_tokens = 100;
        })
        .unwrap_err();
        assert_eq!(err.code(), "MIN_OUTPUT_TOKENS_OUT_OF_RANGE");

        assert!(with(|p| p.max_output_tokens = 0).is_err());
        assert!(with(|p| p.max_output_tokens = 4097).is_err());
        assert!(with(|p| p.min_output_tokens = -1).is_err());
    }

    #[test]
    fn test_field_ranges() {
        assert!(with(|p| p.top_k = 0).is_err());
        assert!(with(|p| p.top_k = 101).is_err());
        assert!(with(|p| p.top_p = 1.01).is_err());
        assert!(with(|p| p.top_p = 0.0).is_ok());
        assert!(with(|p| p.repetition_penalty = 0.9).is_err());
        assert!(with(|p| p.repetition_penalty = 2.0).unwrap().has_repetition_penalty());
        assert!(with(|p| p.num_beams = 17).is_err());
        assert!(with(|p| p.length_penalty = 2.5).is_err());
    }

    #[test]
    fn test_beam_parameters() {
        let policy = with(|p| {
            p.num_beams = 4;
            p.num_return_sequences = 4;
        })
        .unwrap();
        assert!(policy.is_beam_search());
        assert_eq!(policy.beam_search().num_return_sequences, 4);

        let err = with(|p| {
            p.num_beams = 2;
            p.num_return_sequences = 3;
        })
        .unwrap_err();
        assert!(err.to_string().contains("[1, 2]"));
    }

    #[test]
    fn test_banned_sequences() {
        let policy = with(|p| p.banned_sequences = Some(vec![vec![777], vec![1, 2, 3]])).unwrap();
        assert!(policy.has_banned_sequences());
        assert_eq!(policy.banned_sequences().len(), 2);

        assert!(!with(|p| p.banned_sequences = Some(vec![])).unwrap().has_banned_sequences());
        assert!(!with(|p| p.banned_sequences = None).unwrap().has_banned_sequences());

        let err = with(|p| p.banned_sequences = Some(vec![vec![5], vec![]])).unwrap_err();
        assert_eq!(err.code(), "BANNED_SEQUENCE_EMPTY");
    }

    #[test]
    fn test_from_toml() {
        let policy = GenerationPolicy::from_toml_str(
            r#"
            temperature = 0.0
            max_output_tokens = 64
            min_output_tokens = 8
            banned_sequences = [[123, 456, 789], [777]]
            seed = 42
            "#,
        )
        .unwrap();
        assert!(policy.is_greedy());
        assert!(policy.has_min_length());
        assert_eq!(policy.seed(), Some(42));
        assert_eq!(policy.top_k(), 50);

        let err = GenerationPolicy::from_toml_str("temperature = 3.0").unwrap_err();
        assert!(err.to_string().contains("[0.0, 2.0]"));

        let err = GenerationPolicy::from_toml_str("temperature = [").unwrap_err();
        assert_eq!(err.code(), "POLICY_PARSE_ERROR");
    }

    #[test]
    fn test_json_goes_through_validation() {
        let ok: GenerationPolicy = serde_json::from_str(r#"{"temperature": 1.5}"#).unwrap();
        assert_eq!(ok.temperature(), 1.5);
        assert!(serde_json::from_str::<GenerationPolicy>(r#"{"top_k": 0}"#).is_err());
    }
}
