//! Per-step decoding: score transforms, token selection and repetition tracking

pub mod pipeline;
pub mod repetition;
pub mod sampler;

use crate::metrics::PerformanceSnapshot;
use serde::{Deserialize, Serialize};

/// Running state of one generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationState {
    generated_tokens: Vec<u32>,
}

impl GenerationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generated tokens, in emission order
    pub fn generated_tokens(&self) -> &[u32] {
        &self.generated_tokens
    }

    /// Number of tokens generated so far
    pub fn position(&self) -> usize {
        self.generated_tokens.len()
    }

    /// Append the token chosen for the current step
    pub fn push(&mut self, token: u32) {
        self.generated_tokens.push(token);
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// End of sequence token generated
    EndOfSequence,

    /// Reached max_output_tokens
    MaxTokens,

    /// The repetition guard flagged pathological repetition
    Hallucination,
}

/// Result of a completed generation
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    /// Generated tokens, including a terminal EOS token when one was produced
    pub tokens: Vec<u32>,

    /// Decoded text, empty when no tokenizer was available
    pub text: String,

    /// Reason generation stopped
    pub finish_reason: FinishReason,

    /// Timing and throughput
    pub metrics: PerformanceSnapshot,

    /// Output quality warnings, if validation ran
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
