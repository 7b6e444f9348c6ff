//! Wall-clock instrumentation of a generation request

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Timed phases of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Model / collaborator initialization
    Init,
    /// Prompt tokenization
    Tokenization,
    /// One-shot prompt encoding (encoder-decoder models)
    Encoder,
    /// The step loop
    Decoder,
}

impl Phase {
    const ALL: [Phase; 4] = [Phase::Init, Phase::Tokenization, Phase::Encoder, Phase::Decoder];

    fn index(self) -> usize {
        match self {
            Phase::Init => 0,
            Phase::Tokenization => 1,
            Phase::Encoder => 2,
            Phase::Decoder => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Span {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl Span {
    /// Zero unless both ends were recorded in order
    fn duration(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// Records phase timestamps and token counters for one request
///
/// Owned by a single session. [`PerformanceRecorder::reset`] prepares it for
/// the next request on a warm engine: everything is cleared and the init phase
/// is marked as already reported, so later snapshots show zero init time.
#[derive(Debug, Clone, Default)]
pub struct PerformanceRecorder {
    phases: [Span; 4],
    generation: Span,
    first_token: Option<Instant>,
    ttft_override: Option<Duration>,
    input_tokens: usize,
    output_tokens: usize,
    init_reported: bool,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, phase: Phase) {
        self.start_at(phase, Instant::now());
    }

    pub fn end(&mut self, phase: Phase) {
        self.end_at(phase, Instant::now());
    }

    /// Record a phase start at an explicit instant
    pub fn start_at(&mut self, phase: Phase, at: Instant) {
        self.phases[phase.index()].start = Some(at);
    }

    /// Record a phase end at an explicit instant
    pub fn end_at(&mut self, phase: Phase, at: Instant) {
        self.phases[phase.index()].end = Some(at);
    }

    /// Mark the beginning of token generation, the reference point for TTFT
    pub fn start_generation(&mut self) {
        self.start_generation_at(Instant::now());
    }

    pub fn start_generation_at(&mut self, at: Instant) {
        self.generation.start = Some(at);
    }

    /// Mark the end of token generation and record the output token count
    pub fn end_generation(&mut self, output_tokens: usize) {
        self.end_generation_at(Instant::now(), output_tokens);
    }

    pub fn end_generation_at(&mut self, at: Instant, output_tokens: usize) {
        self.generation.end = Some(at);
        self.output_tokens = output_tokens;
    }

    /// Record the first emitted token; later calls are ignored
    pub fn record_first_token(&mut self) {
        self.record_first_token_at(Instant::now());
    }

    pub fn record_first_token_at(&mut self, at: Instant) {
        if self.first_token.is_none() {
            self.first_token = Some(at);
        }
    }

    /// Supply an externally measured time to first token
    ///
    /// Takes precedence over the value derived from timestamps.
    pub fn record_ttft(&mut self, ttft: Duration) {
        self.ttft_override = Some(ttft);
    }

    pub fn record_input_tokens(&mut self, count: usize) {
        self.input_tokens = count;
    }

    pub fn record_output_tokens(&mut self, count: usize) {
        self.output_tokens = count;
    }

    /// Clear all timings for the next request, keeping init marked as reported
    pub fn reset(&mut self) {
        *self = Self {
            init_reported: true,
            ..Self::default()
        };
    }

    /// Duration of a phase; zero if incomplete, and zero for init once reported
    pub fn phase_duration(&self, phase: Phase) -> Duration {
        if phase == Phase::Init && self.init_reported {
            return Duration::ZERO;
        }
        self.phases[phase.index()].duration()
    }

    /// Time from generation start to the first token, unless overridden
    pub fn time_to_first_token(&self) -> Duration {
        if let Some(ttft) = self.ttft_override {
            return ttft;
        }
        match (self.generation.start, self.first_token) {
            (Some(start), Some(first)) => first.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Output tokens divided by decoder seconds, 0.0 without decoder time
    pub fn tokens_per_second(&self) -> f64 {
        let seconds = self.phase_duration(Phase::Decoder).as_secs_f64();
        if seconds > 0.0 {
            self.output_tokens as f64 / seconds
        } else {
            0.0
        }
    }

    /// Tokenization + encoder + decoder time
    pub fn total_time(&self) -> Duration {
        self.phase_duration(Phase::Tokenization)
            + self.phase_duration(Phase::Encoder)
            + self.phase_duration(Phase::Decoder)
    }

    pub fn input_tokens(&self) -> usize {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> usize {
        self.output_tokens
    }

    /// Derived values at this instant
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let ms = |d: Duration| d.as_millis() as u64;
        let [init, tokenization, encoder, decoder] = Phase::ALL.map(|p| self.phase_duration(p));

        PerformanceSnapshot {
            init_time_ms: ms(init),
            tokenization_time_ms: ms(tokenization),
            encoder_time_ms: ms(encoder),
            decoder_time_ms: ms(decoder),
            time_to_first_token_ms: ms(self.time_to_first_token()),
            total_time_ms: ms(self.total_time()),
            tokens_per_second: self.tokens_per_second(),
            input_token_count: self.input_tokens,
            output_token_count: self.output_tokens,
        }
    }
}

/// Derived metrics of one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub init_time_ms: u64,
    pub tokenization_time_ms: u64,
    pub encoder_time_ms: u64,
    pub decoder_time_ms: u64,
    pub time_to_first_token_ms: u64,
    pub total_time_ms: u64,
    pub tokens_per_second: f64,
    pub input_token_count: usize,
    pub output_token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_phase_is_zero() {
        let mut recorder = PerformanceRecorder::new();
        recorder.start(Phase::Encoder);
        assert_eq!(recorder.phase_duration(Phase::Encoder), Duration::ZERO);
        assert_eq!(recorder.phase_duration(Phase::Decoder), Duration::ZERO);
        assert_eq!(recorder.tokens_per_second(), 0.0);
    }

    #[test]
    fn test_derived_metrics() {
        let t0 = Instant::now();
        let mut recorder = PerformanceRecorder::new();

        recorder.start_at(Phase::Tokenization, t0);
        recorder.end_at(Phase::Tokenization, t0 + Duration::from_millis(10));
        recorder.start_at(Phase::Encoder, t0 + Duration::from_millis(10));
        recorder.end_at(Phase::Encoder, t0 + Duration::from_millis(40));
        recorder.start_generation_at(t0 + Duration::from_millis(40));
        recorder.start_at(Phase::Decoder, t0 + Duration::from_millis(40));
        recorder.record_first_token_at(t0 + Duration::from_millis(65));
        recorder.record_first_token_at(t0 + Duration::from_millis(90));
        recorder.end_at(Phase::Decoder, t0 + Duration::from_millis(2040));
        recorder.end_generation_at(t0 + Duration::from_millis(2040), 6);
        recorder.record_input_tokens(12);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.tokenization_time_ms, 10);
        assert_eq!(snapshot.encoder_time_ms, 30);
        assert_eq!(snapshot.decoder_time_ms, 2000);
        assert_eq!(snapshot.time_to_first_token_ms, 25);
        assert_eq!(snapshot.total_time_ms, 2040);
        assert!((snapshot.tokens_per_second - 3.0).abs() < 1e-9);
        assert_eq!(snapshot.input_token_count, 12);
        assert_eq!(snapshot.output_token_count, 6);
    }

    #[test]
    fn test_ttft_override_takes_precedence() {
        let t0 = Instant::now();
        let mut recorder = PerformanceRecorder::new();
        recorder.start_generation_at(t0);
        recorder.record_first_token_at(t0 + Duration::from_millis(50));
        recorder.record_ttft(Duration::from_millis(7));
        assert_eq!(recorder.time_to_first_token(), Duration::from_millis(7));
    }

    #[test]
    fn test_reset_suppresses_init_time() {
        let t0 = Instant::now();
        let mut recorder = PerformanceRecorder::new();
        recorder.start_at(Phase::Init, t0);
        recorder.end_at(Phase::Init, t0 + Duration::from_millis(300));
        recorder.record_output_tokens(4);
        assert_eq!(recorder.snapshot().init_time_ms, 300);

        recorder.reset();
        assert_eq!(recorder.snapshot(), PerformanceSnapshot::default());

        recorder.start_at(Phase::Init, t0);
        recorder.end_at(Phase::Init, t0 + Duration::from_millis(300));
        assert_eq!(recorder.snapshot().init_time_ms, 0);
    }
}
