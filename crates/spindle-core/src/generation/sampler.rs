//! Token selection: greedy argmax, top-k / nucleus truncation and categorical sampling

use crate::{policy::GenerationPolicy, validation::Validator, CoreError, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use tracing::trace;

/// Compute softmax of scores
///
/// The maximum is subtracted before exponentiating, so large positive scores
/// cannot overflow. `-inf` entries get probability 0 and NaN entries are
/// treated the same way. A vector with no finite maximum falls back to a
/// uniform distribution over its best entries.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    // f32::max ignores NaN operands
    let max_score = scores.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));

    if max_score == f32::NEG_INFINITY {
        return vec![1.0 / scores.len() as f32; scores.len()];
    }
    if max_score == f32::INFINITY {
        let winners = scores.iter().filter(|&&x| x == f32::INFINITY).count();
        return scores
            .iter()
            .map(|&x| if x == f32::INFINITY { 1.0 / winners as f32 } else { 0.0 })
            .collect();
    }

    let exp_scores: Vec<f32> = scores
        .iter()
        .map(|&x| if x.is_nan() { 0.0 } else { (x - max_score).exp() })
        .collect();

    // At least the maximum contributes exp(0) = 1
    let sum_exp: f32 = exp_scores.iter().sum();
    exp_scores.iter().map(|&x| x / sum_exp).collect()
}

/// Indices ordered by descending value; ties keep ascending index order
///
/// NaN ranks with `-inf`, so truncation never keeps it ahead of a real score.
fn descending_order(values: &[f32]) -> Vec<usize> {
    let key = |idx: usize| {
        let value = values[idx];
        if value.is_nan() {
            f32::NEG_INFINITY
        } else {
            value
        }
    };
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    order
}

/// Keep the `k` highest scores and mask everything else to `-inf`
///
/// A `k` at or above the vocabulary size leaves the scores untouched.
pub fn apply_top_k(scores: &mut [f32], k: usize) -> Result<()> {
    Validator::check_parameter("INVALID_TOP_K", k > 0, "k", k, "[1, vocab_size]", "Top-k truncation")?;

    if k >= scores.len() {
        return Ok(());
    }

    for &idx in descending_order(scores).iter().skip(k) {
        scores[idx] = f32::NEG_INFINITY;
    }
    Ok(())
}

/// Keep the smallest highest-probability prefix whose mass reaches `p`
pub fn apply_top_p(scores: &mut [f32], p: f32) -> Result<()> {
    Validator::check_parameter(
        "INVALID_TOP_P",
        p > 0.0 && p <= 1.0,
        "p",
        p,
        "(0.0, 1.0]",
        "Nucleus truncation",
    )?;

    let probabilities = softmax(scores);
    let order = descending_order(&probabilities);

    let mut cumulative = 0.0f32;
    let mut cutoff = order.len();
    for (rank, &idx) in order.iter().enumerate() {
        cumulative += probabilities[idx];
        if cumulative >= p {
            cutoff = rank + 1;
            break;
        }
    }

    for &idx in order.iter().skip(cutoff) {
        scores[idx] = f32::NEG_INFINITY;
    }
    trace!("Nucleus kept {} of {} candidates (p = {})", cutoff, scores.len(), p);
    Ok(())
}

/// Chooses the next token from a score vector
///
/// Greedy selection skips a configurable set of excluded ids. Sampling draws
/// from a private RNG, seeded when reproducible output is wanted.
#[derive(Debug, Clone)]
pub struct TokenSelector {
    excluded: HashSet<u32>,
    rng: StdRng,
}

impl TokenSelector {
    /// Create a selector; `seed = None` seeds the RNG from entropy
    pub fn new<I>(excluded_ids: I, seed: Option<u64>) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            excluded: excluded_ids.into_iter().collect(),
            rng,
        }
    }

    /// Greedy selection: index of the maximum score, first maximum wins
    pub fn argmax(&self, scores: &[f32]) -> Result<u32> {
        if scores.is_empty() {
            return Err(CoreError::invalid_input(
                "EMPTY_SCORES",
                "Cannot select a token from an empty score vector",
                "Greedy selection",
                "Check that the forward pass produces one score per vocabulary entry",
            ));
        }

        let mut best: Option<(usize, f32)> = None;
        for (idx, &score) in scores.iter().enumerate() {
            if score.is_nan() || self.excluded.contains(&(idx as u32)) {
                continue;
            }
            match best {
                Some((_, best_score)) if score > best_score => best = Some((idx, score)),
                None => best = Some((idx, score)),
                _ => {}
            }
        }

        best.map(|(idx, _)| idx as u32).ok_or_else(|| {
            CoreError::invalid_input(
                "NO_SELECTABLE_TOKEN",
                format!(
                    "All {} scores are excluded or NaN, nothing to select",
                    scores.len()
                ),
                "Greedy selection",
                "Reduce the excluded token set or check the forward pass output",
            )
        })
    }

    /// Categorical draw from the softmax of `scores`
    ///
    /// Walks the cumulative distribution in index order and returns the first
    /// token with non-zero probability whose cumulative mass reaches the draw.
    /// Falls back to [`TokenSelector::argmax`] if rounding keeps the total
    /// below the draw.
    pub fn sample(&mut self, scores: &[f32]) -> Result<u32> {
        if scores.is_empty() {
            return Err(CoreError::invalid_input(
                "EMPTY_SCORES",
                "Cannot sample from an empty score vector",
                "Categorical sampling",
                "Check that the forward pass produces one score per vocabulary entry",
            ));
        }

        let probabilities = softmax(scores);
        let draw: f32 = self.rng.gen();

        let mut cumulative = 0.0f32;
        for (idx, &prob) in probabilities.iter().enumerate() {
            if prob <= 0.0 {
                continue;
            }
            cumulative += prob;
            if cumulative >= draw {
                return Ok(idx as u32);
            }
        }

        trace!("Cumulative mass {} stayed below draw {}, using argmax", cumulative, draw);
        self.argmax(scores)
    }

    /// Sample among the `k` highest scores
    pub fn sample_top_k(&mut self, scores: &[f32], k: usize) -> Result<u32> {
        let mut filtered = scores.to_vec();
        apply_top_k(&mut filtered, k)?;
        self.sample(&filtered)
    }

    /// Sample from the nucleus of probability mass `p`
    pub fn sample_top_p(&mut self, scores: &[f32], p: f32) -> Result<u32> {
        let mut filtered = scores.to_vec();
        apply_top_p(&mut filtered, p)?;
        self.sample(&filtered)
    }

    /// Select the next token as the policy prescribes
    ///
    /// Strategies are exclusive: greedy policies use argmax, otherwise top-k
    /// wins over nucleus truncation, and with neither the full distribution is
    /// sampled. Truncation is applied to `scores` in place.
    pub fn select(&mut self, scores: &mut [f32], policy: &GenerationPolicy) -> Result<u32> {
        if policy.is_greedy() {
            return self.argmax(scores);
        }

        if policy.uses_top_k() {
            apply_top_k(scores, policy.top_k())?;
        } else if policy.uses_top_p() {
            apply_top_p(scores, policy.top_p())?;
        }
        self.sample(scores)
    }
}
