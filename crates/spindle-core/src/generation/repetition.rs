//! Detection of pathological token-window repetition

use crate::{validation::Validator, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of one repetition check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionSignal {
    /// Nothing suspicious
    Clear,
    /// The trailing window has been seen `count` times this session
    Frequent { count: usize },
    /// The trailing window repeats back to back `count` times
    Consecutive { count: usize },
}

impl RepetitionSignal {
    /// Whether generation should stop early
    pub fn is_hallucinating(&self) -> bool {
        !matches!(self, Self::Clear)
    }
}

/// Tracks fixed-length token windows across a session
///
/// Two independent triggers, either one is sufficient:
/// - the trailing window has occurred more than `repetition_threshold` times
///   over all checks since the last reset
/// - the trailing window repeats back to back more than
///   `repetition_threshold` times at the end of the history
///
/// Exactly `repetition_threshold` occurrences never trigger.
#[derive(Debug, Clone)]
pub struct RepetitionGuard {
    sequence_length: usize,
    repetition_threshold: usize,
    window_counts: HashMap<Vec<u32>, usize>,
}

impl RepetitionGuard {
    /// Create a guard; both parameters must be at least 2
    pub fn new(sequence_length: usize, repetition_threshold: usize) -> Result<Self> {
        Validator::check_parameter(
            "INVALID_SEQUENCE_LENGTH",
            sequence_length >= 2,
            "sequence_length",
            sequence_length,
            "[2, usize::MAX]",
            "Creating repetition guard",
        )?;
        Validator::check_parameter(
            "INVALID_REPETITION_THRESHOLD",
            repetition_threshold >= 2,
            "repetition_threshold",
            repetition_threshold,
            "[2, usize::MAX]",
            "Creating repetition guard",
        )?;

        debug!(
            "Repetition guard initialized: sequence_length={}, threshold={}",
            sequence_length, repetition_threshold
        );

        Ok(Self {
            sequence_length,
            repetition_threshold,
            window_counts: HashMap::new(),
        })
    }

    /// Record the trailing window of `history` and check both triggers
    ///
    /// Meant to be called once per generated token with the full history.
    pub fn check(&mut self, history: &[u32]) -> RepetitionSignal {
        let len = self.sequence_length;
        if history.len() < len {
            return RepetitionSignal::Clear;
        }

        let window = &history[history.len() - len..];
        let count = self.window_counts.entry(window.to_vec()).or_insert(0);
        *count += 1;
        let count = *count;

        if count > self.repetition_threshold {
            warn!(
                "Hallucination detected: window {:?} seen {} times (threshold: {})",
                window, count, self.repetition_threshold
            );
            return RepetitionSignal::Frequent { count };
        }

        if history.len() >= 2 * len {
            let previous = &history[history.len() - 2 * len..history.len() - len];
            if previous == window {
                let consecutive = self.count_consecutive(history, window);
                debug!(
                    "Immediate repetition of {:?}, {} consecutive windows",
                    window, consecutive
                );
                if consecutive > self.repetition_threshold {
                    warn!(
                        "Hallucination detected: window {:?} repeated {} consecutive times",
                        window, consecutive
                    );
                    return RepetitionSignal::Consecutive { count: consecutive };
                }
            }
        }

        RepetitionSignal::Clear
    }

    /// Convenience wrapper over [`RepetitionGuard::check`]
    pub fn is_hallucinating(&mut self, history: &[u32]) -> bool {
        self.check(history).is_hallucinating()
    }

    /// Count identical `window`-sized strides walking back from the end
    fn count_consecutive(&self, history: &[u32], window: &[u32]) -> usize {
        history
            .rchunks_exact(self.sequence_length)
            .take_while(|chunk| *chunk == window)
            .count()
    }

    /// Forget all recorded windows; call between sessions, never mid-session
    pub fn reset(&mut self) {
        self.window_counts.clear();
        debug!("Repetition guard reset");
    }

    /// Number of distinct windows recorded since the last reset
    pub fn unique_window_count(&self) -> usize {
        self.window_counts.len()
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn repetition_threshold(&self) -> usize {
        self.repetition_threshold
    }
}
