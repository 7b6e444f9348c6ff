//! Score transform pipeline applied to each step's score vector before selection
//!
//! The stages always run in the same order:
//!
//! 1. repetition penalty
//! 2. banned-sequence masking
//! 3. minimum-length masking
//! 4. temperature scaling
//!
//! Top-k / nucleus truncation happens in [`TokenSelector`] because it shares
//! the sorted candidate set with the categorical draw.
//!
//! [`TokenSelector`]: crate::generation::sampler::TokenSelector

use crate::{
    generation::GenerationState, policy::GenerationPolicy, validation::Validator, Result,
};
use std::collections::HashSet;
use tracing::trace;

/// Divide the score of every distinct token in `history` by `penalty`
///
/// No-op for a penalty of 1.0 or an empty history. Ids outside the score
/// vector are ignored.
pub fn apply_repetition_penalty(scores: &mut [f32], history: &[u32], penalty: f32) {
    if penalty == 1.0 || history.is_empty() {
        return;
    }

    let distinct: HashSet<u32> = history.iter().copied().collect();
    for token in distinct {
        if let Some(score) = scores.get_mut(token as usize) {
            *score /= penalty;
        }
    }
}

/// Resolve a banned-sequence id to a score index, ignoring negative or out-of-range ids
fn score_index(token: i64, vocab_size: usize) -> Option<usize> {
    usize::try_from(token).ok().filter(|&idx| idx < vocab_size)
}

/// Whether `history` ends with `prefix`
fn ends_with_prefix(history: &[u32], prefix: &[i64]) -> bool {
    if prefix.len() > history.len() {
        return false;
    }
    history[history.len() - prefix.len()..]
        .iter()
        .zip(prefix)
        .all(|(&generated, &banned)| i64::from(generated) == banned)
}

/// Mask the tokens that would complete a banned sequence
///
/// Single-token sequences are always masked. Longer sequences mask their last
/// token only when the history ends with the rest of the sequence.
pub fn apply_banned_sequences(scores: &mut [f32], history: &[u32], banned: &[Vec<i64>]) {
    let vocab_size = scores.len();
    for sequence in banned {
        let Some((&last, prefix)) = sequence.split_last() else {
            continue;
        };
        if !prefix.is_empty() && !ends_with_prefix(history, prefix) {
            continue;
        }
        if let Some(idx) = score_index(last, vocab_size) {
            trace!("Masking token {} to avoid banned sequence {:?}", idx, sequence);
            scores[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Whether the next token could complete a multi-token banned sequence
pub fn would_complete_banned_sequence(history: &[u32], banned: &[Vec<i64>]) -> bool {
    banned
        .iter()
        .filter(|sequence| sequence.len() > 1)
        .any(|sequence| ends_with_prefix(history, &sequence[..sequence.len() - 1]))
}

/// Mask the EOS token while fewer than `min_tokens` tokens have been generated
pub fn apply_min_length(scores: &mut [f32], position: usize, min_tokens: usize, eos_token_id: u32) {
    if position >= min_tokens {
        return;
    }
    if let Some(score) = scores.get_mut(eos_token_id as usize) {
        *score = f32::NEG_INFINITY;
    }
}

/// Divide every score by `temperature`
///
/// A temperature of 1.0 is a no-op; zero or negative values are rejected.
pub fn apply_temperature(scores: &mut [f32], temperature: f32) -> Result<()> {
    Validator::check_parameter(
        "INVALID_TEMPERATURE",
        temperature > 0.0,
        "temperature",
        temperature,
        "(0.0, 2.0]",
        "Temperature scaling outside greedy decoding",
    )?;

    if temperature != 1.0 {
        for score in scores.iter_mut() {
            *score /= temperature;
        }
    }
    Ok(())
}

/// Fixed-order score mutations configured from a [`GenerationPolicy`]
#[derive(Debug, Clone)]
pub struct ScoreTransformPipeline {
    repetition_penalty: f32,
    banned_sequences: Vec<Vec<i64>>,
    min_output_tokens: usize,
    temperature: f32,
    greedy: bool,
    eos_token_id: u32,
}

impl ScoreTransformPipeline {
    /// Build the pipeline for one request
    pub fn new(policy: &GenerationPolicy, eos_token_id: u32) -> Self {
        Self {
            repetition_penalty: policy.repetition_penalty(),
            banned_sequences: policy.banned_sequences().to_vec(),
            min_output_tokens: policy.min_output_tokens(),
            temperature: policy.temperature(),
            greedy: policy.is_greedy(),
            eos_token_id,
        }
    }

    /// Apply all stages in place for the current step
    pub fn apply(&self, scores: &mut [f32], state: &GenerationState) -> Result<()> {
        let history = state.generated_tokens();

        apply_repetition_penalty(scores, history, self.repetition_penalty);

        if !self.banned_sequences.is_empty() {
            apply_banned_sequences(scores, history, &self.banned_sequences);
        }

        if self.min_output_tokens > 0 {
            apply_min_length(scores, state.position(), self.min_output_tokens, self.eos_token_id);
        }

        // Greedy selection ignores temperature
        if !self.greedy {
            apply_temperature(scores, self.temperature)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyParams;

    fn state_with(tokens: &[u32]) -> GenerationState {
        let mut state = GenerationState::new();
        for &token in tokens {
            state.push(token);
        }
        state
    }

    fn policy(f: impl FnOnce(&mut PolicyParams)) -> GenerationPolicy {
        let mut params = PolicyParams {
            temperature: 0.0,
            ..Default::default()
        };
        f(&mut params);
        GenerationPolicy::create(params).unwrap()
    }

    #[test]
    fn test_repetition_penalty_divides_distinct_tokens() {
        let mut scores = vec![2.0, 4.0, 6.0, 8.0];
        apply_repetition_penalty(&mut scores, &[1, 3, 3, 3], 2.0);
        // Token 3 appears three times but is penalized once
        assert_eq!(scores, vec![2.0, 2.0, 6.0, 4.0]);
    }

    #[test]
    fn test_repetition_penalty_noops() {
        let mut scores = vec![2.0, 4.0];
        apply_repetition_penalty(&mut scores, &[0, 1], 1.0);
        assert_eq!(scores, vec![2.0, 4.0]);

        apply_repetition_penalty(&mut scores, &[], 1.5);
        assert_eq!(scores, vec![2.0, 4.0]);

        apply_repetition_penalty(&mut scores, &[99], 1.5);
        assert_eq!(scores, vec![2.0, 4.0]);
    }

    #[test]
    fn test_banned_sequence_prefix_match() {
        let banned = vec![vec![123, 456, 789]];
        let mut scores = vec![1.0; 1000];
        apply_banned_sequences(&mut scores, &[5, 123, 456], &banned);
        assert_eq!(scores[789], f32::NEG_INFINITY);
        assert_eq!(scores[123], 1.0);
        assert_eq!(scores[456], 1.0);

        let mut scores = vec![1.0; 1000];
        apply_banned_sequences(&mut scores, &[100, 200], &banned);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_single_token_banned_always_masked() {
        let banned = vec![vec![777]];
        for history in [&[][..], &[1, 2, 3][..], &[777][..]] {
            let mut scores = vec![0.5; 1000];
            apply_banned_sequences(&mut scores, history, &banned);
            assert_eq!(scores[777], f32::NEG_INFINITY);
            assert_eq!(scores.iter().filter(|s| s.is_infinite()).count(), 1);
        }
    }

    #[test]
    fn test_banned_sequence_ignores_invalid_ids() {
        let banned = vec![vec![-1], vec![5000], vec![-3, 2]];
        let mut scores = vec![1.0; 10];
        apply_banned_sequences(&mut scores, &[1, 2], &banned);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_banned_sequence_longer_than_history() {
        let banned = vec![vec![1, 2, 3, 4]];
        let mut scores = vec![1.0; 10];
        apply_banned_sequences(&mut scores, &[2, 3], &banned);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_would_complete_banned_sequence() {
        let banned = vec![vec![7], vec![1, 2, 3]];
        assert!(would_complete_banned_sequence(&[9, 1, 2], &banned));
        assert!(!would_complete_banned_sequence(&[9, 1], &banned));
        assert!(!would_complete_banned_sequence(&[], &[vec![7]]));
    }

    #[test]
    fn test_min_length_masks_eos() {
        let mut scores = vec![1.0; 10];
        apply_min_length(&mut scores, 5, 20, 2);
        assert_eq!(scores[2], f32::NEG_INFINITY);

        let mut scores = vec![1.0; 10];
        apply_min_length(&mut scores, 20, 20, 2);
        assert_eq!(scores[2], 1.0);
    }

    #[test]
    fn test_temperature_scaling() {
        let mut scores = vec![1.0, 2.0, 4.0];
        apply_temperature(&mut scores, 0.5).unwrap();
        assert_eq!(scores, vec![2.0, 4.0, 8.0]);

        let mut scores = vec![1.0, 2.0];
        apply_temperature(&mut scores, 1.0).unwrap();
        assert_eq!(scores, vec![1.0, 2.0]);

        let err = apply_temperature(&mut scores, 0.0).unwrap_err();
        assert_eq!(err.code(), "INVALID_TEMPERATURE");
        assert!(apply_temperature(&mut scores, -1.0).is_err());
    }

    #[test]
    fn test_pipeline_stage_order() {
        let pipeline = ScoreTransformPipeline::new(
            &policy(|p| {
                p.temperature = 0.5;
                p.repetition_penalty = 2.0;
                p.min_output_tokens = 3;
                p.banned_sequences = Some(vec![vec![4]]);
            }),
            1,
        );

        let mut scores = vec![1.0, 1.0, 8.0, 1.0, 1.0];
        pipeline.apply(&mut scores, &state_with(&[2])).unwrap();

        // Penalty then temperature on token 2: 8 / 2 / 0.5
        assert_eq!(scores[2], 8.0);
        assert_eq!(scores[0], 2.0);
        assert_eq!(scores[1], f32::NEG_INFINITY);
        assert_eq!(scores[4], f32::NEG_INFINITY);
    }

    #[test]
    fn test_greedy_pipeline_skips_temperature() {
        let pipeline = ScoreTransformPipeline::new(&policy(|_| {}), 1);
        let mut scores = vec![1.0, 2.0, 3.0];
        pipeline.apply(&mut scores, &GenerationState::new()).unwrap();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);
    }
}
