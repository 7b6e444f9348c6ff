//! Generation session: drives one request through the step loop
//!
//! Each step pulls a score vector from the [`ForwardPass`] collaborator, runs
//! it through the [`ScoreTransformPipeline`], lets the [`TokenSelector`] pick a
//! token, and then consults the stop conditions and the [`RepetitionGuard`].
//!
//! Everything runs synchronously on the calling thread. A [`StreamingSink`]
//! sees tokens strictly in emission order, one call per token, before the
//! next forward pass starts. Implementations must not assume asynchronous
//! delivery.

use crate::{
    config::EngineConfig,
    engine::ModelArchitecture,
    generation::{
        pipeline::ScoreTransformPipeline,
        repetition::{RepetitionGuard, RepetitionSignal},
        sampler::TokenSelector,
        FinishReason, GenerationOutput, GenerationState,
    },
    metrics::{Phase, PerformanceRecorder},
    policy::GenerationPolicy,
    validation::OutputValidator,
    CoreError, Result,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Produces the next-token scores; the neural network lives behind this trait
pub trait ForwardPass {
    /// Number of entries in every score vector
    fn vocab_size(&self) -> usize;

    fn eos_token_id(&self) -> u32;

    fn architecture(&self) -> ModelArchitecture {
        ModelArchitecture::DecoderOnly
    }

    /// Encode the prompt once before decoding starts (encoder-decoder models)
    fn encode_prompt(&mut self, _prompt: &[u32]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Scores for the token following `context`
    fn next_scores(&mut self, context: &[u32]) -> anyhow::Result<Vec<f32>>;
}

/// Text <-> token conversion
pub trait Tokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String>;

    fn decode_token(&self, token: u32) -> anyhow::Result<String> {
        self.decode(&[token])
    }
}

/// Receives generated tokens as they are produced
///
/// Calls happen synchronously, in order, on the thread running the session.
pub trait StreamingSink {
    /// Called once per generated token
    ///
    /// `position` is the zero-based index of the token in the output and
    /// `is_last` is true only for the final token. Returning an error fails the
    /// session.
    fn on_token(&mut self, token_id: u32, text: &str, position: usize, is_last: bool)
        -> anyhow::Result<()>;

    /// Called once when the session fails; errors returned here are logged and dropped
    fn on_error(&mut self, _error: &CoreError) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once after the final token
    fn on_complete(&mut self, _output: &GenerationOutput) {}
}

impl<F> StreamingSink for F
where
    F: FnMut(u32, &str, usize, bool) -> anyhow::Result<()>,
{
    fn on_token(&mut self, token_id: u32, text: &str, position: usize, is_last: bool)
        -> anyhow::Result<()> {
        self(token_id, text, position, is_last)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Ready,
    Running,
    /// Stopped on EOS or the token limit
    Completed,
    /// Stopped by the repetition guard
    StoppedEarly,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::StoppedEarly | Self::Failed)
    }
}

/// One generation request, run at most once
pub struct GenerationSession {
    id: String,
    policy: GenerationPolicy,
    excluded_token_ids: Vec<u32>,
    guard: Option<RepetitionGuard>,
    validator: Option<OutputValidator>,
    recorder: PerformanceRecorder,
    state: SessionState,
    generation: GenerationState,
}

impl GenerationSession {
    /// Create a session for `policy` with engine-wide settings from `config`
    pub fn new(policy: GenerationPolicy, config: &EngineConfig) -> Result<Self> {
        let guard = config
            .repetition_guard
            .map(|g| RepetitionGuard::new(g.sequence_length, g.repetition_threshold))
            .transpose()?;

        let id = Uuid::new_v4().to_string();
        debug!(
            "Created session '{}' (greedy: {}, max tokens: {})",
            id,
            policy.is_greedy(),
            policy.max_output_tokens()
        );

        Ok(Self {
            id,
            policy,
            excluded_token_ids: config.excluded_token_ids.clone(),
            guard,
            validator: config.validate_output.then(OutputValidator::default),
            recorder: PerformanceRecorder::new(),
            state: SessionState::Ready,
            generation: GenerationState::new(),
        })
    }

    /// Use `recorder` instead of a fresh one, keeping phases already recorded
    pub fn with_recorder(mut self, recorder: PerformanceRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &GenerationPolicy {
        &self.policy
    }

    pub fn recorder(&self) -> &PerformanceRecorder {
        &self.recorder
    }

    pub fn generated_tokens(&self) -> &[u32] {
        self.generation.generated_tokens()
    }

    /// Run the step loop to completion
    ///
    /// Without a tokenizer the output text is empty and streamed fragments are
    /// empty strings. On failure the sink's `on_error` is invoked once and the
    /// error is returned; no partial output is produced.
    pub fn run(
        &mut self,
        forward: &mut dyn ForwardPass,
        prompt: &[u32],
        tokenizer: Option<&dyn Tokenizer>,
        mut sink: Option<&mut dyn StreamingSink>,
    ) -> Result<GenerationOutput> {
        if self.state != SessionState::Ready {
            return Err(CoreError::invalid_input(
                "SESSION_NOT_READY",
                format!("Session '{}' is {:?}, it can only run once", self.id, self.state),
                "Starting generation",
                "Create a new session for every request",
            ));
        }
        self.state = SessionState::Running;

        match self.drive(forward, prompt, tokenizer, &mut sink) {
            Ok(output) => {
                if let Some(sink) = sink.as_mut() {
                    sink.on_complete(&output);
                }
                Ok(output)
            }
            Err(err) => {
                self.state = SessionState::Failed;
                warn!("Session '{}' failed: {}", self.id, err);
                if let Some(sink) = sink.as_mut() {
                    if let Err(sink_err) = sink.on_error(&err) {
                        warn!("Streaming sink failed to accept error: {:#}", sink_err);
                    }
                }
                Err(err)
            }
        }
    }

    fn drive(
        &mut self,
        forward: &mut dyn ForwardPass,
        prompt: &[u32],
        tokenizer: Option<&dyn Tokenizer>,
        sink: &mut Option<&mut dyn StreamingSink>,
    ) -> Result<GenerationOutput> {
        let eos = forward.eos_token_id();
        let vocab_size = forward.vocab_size();
        let pipeline = ScoreTransformPipeline::new(&self.policy, eos);
        // EOS stays selectable so greedy decoding can terminate
        let mut selector = TokenSelector::new(
            self.excluded_token_ids.iter().copied().filter(|&id| id != eos),
            self.policy.seed(),
        );
        if let Some(guard) = self.guard.as_mut() {
            guard.reset();
        }

        self.recorder.record_input_tokens(prompt.len());

        let architecture = forward.architecture();
        let mut context = match architecture {
            ModelArchitecture::EncoderDecoder => {
                self.recorder.start(Phase::Encoder);
                forward
                    .encode_prompt(prompt)
                    .map_err(|e| self.collaborator_failure("ENCODER_FAILED", "Encoding prompt", 0, e))?;
                self.recorder.end(Phase::Encoder);
                Vec::new()
            }
            ModelArchitecture::DecoderOnly => prompt.to_vec(),
        };

        debug!(
            "Session '{}' decoding: {} architecture, {} prompt tokens, vocab {}",
            self.id,
            architecture,
            prompt.len(),
            vocab_size
        );

        self.recorder.start_generation();
        self.recorder.start(Phase::Decoder);

        let mut streamed = String::new();
        let finish_reason = loop {
            let step = self.generation.position();

            let mut scores = forward.next_scores(&context).map_err(|e| {
                self.collaborator_failure("FORWARD_PASS_FAILED", "Computing next-token scores", step, e)
            })?;
            if scores.len() != vocab_size {
                return Err(CoreError::generation(
                    "SCORE_LENGTH_MISMATCH",
                    format!(
                        "Forward pass returned {} scores, expected vocabulary size {}",
                        scores.len(),
                        vocab_size
                    ),
                    "Validating forward pass output",
                    "The forward pass must return one score per vocabulary entry",
                )
                .at_step(&self.id, step));
            }

            pipeline.apply(&mut scores, &self.generation)?;
            let token = selector.select(&mut scores, &self.policy)?;

            self.generation.push(token);
            context.push(token);
            self.recorder.record_first_token();

            let signal = match self.guard.as_mut() {
                Some(guard) => guard.check(self.generation.generated_tokens()),
                None => RepetitionSignal::Clear,
            };
            let finish = if token == eos {
                Some(FinishReason::EndOfSequence)
            } else if signal.is_hallucinating() {
                Some(FinishReason::Hallucination)
            } else if self.generation.position() >= self.policy.max_output_tokens() {
                Some(FinishReason::MaxTokens)
            } else {
                None
            };

            trace!("Step {}: token {} (finish: {:?})", step, token, finish);

            if let Some(sink) = sink.as_mut() {
                let fragment = match tokenizer {
                    Some(tokenizer) => self.next_fragment(tokenizer, &mut streamed, token, eos, step)?,
                    None => String::new(),
                };
                sink.on_token(token, &fragment, step, finish.is_some())
                    .map_err(|e| {
                        self.collaborator_failure("SINK_DELIVERY_FAILED", "Delivering streamed token", step, e)
                    })?;
            }

            if let Some(reason) = finish {
                break reason;
            }
        };

        self.recorder.end(Phase::Decoder);
        self.recorder.end_generation(self.generation.position());

        let text = match tokenizer {
            Some(tokenizer) => tokenizer
                .decode(content_tokens(self.generation.generated_tokens(), eos))
                .map_err(|e| {
                    self.collaborator_failure("DECODE_FAILED", "Decoding generated tokens", self.generation.position(), e)
                })?,
            None => String::new(),
        };

        let warnings = match (&self.validator, tokenizer) {
            (Some(validator), Some(_)) => {
                let report = validator.validate(&text);
                for problem in report.errors.iter().chain(&report.warnings) {
                    warn!("Output quality: {}", problem);
                }
                report.errors.into_iter().chain(report.warnings).collect()
            }
            _ => Vec::new(),
        };

        self.state = match finish_reason {
            FinishReason::Hallucination => SessionState::StoppedEarly,
            FinishReason::EndOfSequence | FinishReason::MaxTokens => SessionState::Completed,
        };

        let metrics = self.recorder.snapshot();
        info!(
            "Session '{}' {:?}: {} tokens, {:?}, {:.1} tokens/s",
            self.id,
            self.state,
            self.generation.position(),
            finish_reason,
            metrics.tokens_per_second
        );

        Ok(GenerationOutput {
            tokens: self.generation.generated_tokens().to_vec(),
            text,
            finish_reason,
            metrics,
            warnings,
        })
    }

    /// Text added by the newest token
    ///
    /// Decodes the whole sequence and emits the new suffix so sub-word
    /// spacing comes out right. Falls back to decoding the single token when
    /// the previously emitted text is no longer a prefix.
    fn next_fragment(
        &self,
        tokenizer: &dyn Tokenizer,
        streamed: &mut String,
        token: u32,
        eos: u32,
        step: usize,
    ) -> Result<String> {
        if token == eos {
            return Ok(String::new());
        }

        let full = tokenizer
            .decode(content_tokens(self.generation.generated_tokens(), eos))
            .map_err(|e| self.collaborator_failure("DECODE_FAILED", "Decoding streamed token", step, e))?;

        match full.strip_prefix(streamed.as_str()) {
            Some(suffix) => {
                let fragment = suffix.to_string();
                *streamed = full;
                Ok(fragment)
            }
            None => {
                let fragment = tokenizer
                    .decode_token(token)
                    .map_err(|e| self.collaborator_failure("DECODE_FAILED", "Decoding streamed token", step, e))?;
                streamed.push_str(&fragment);
                Ok(fragment)
            }
        }
    }

    fn collaborator_failure(
        &self,
        code: &'static str,
        context: &str,
        step: usize,
        err: anyhow::Error,
    ) -> CoreError {
        CoreError::Generation {
            code,
            message: format!("{:#}", err),
            context: context.to_string(),
            suggestion: "Generation is not retried; start a new session once the cause is fixed"
                .to_string(),
            session_id: Some(self.id.clone()),
            step: Some(step),
            source: Some(err),
        }
    }
}

/// Generated tokens without a terminal EOS
fn content_tokens(tokens: &[u32], eos: u32) -> &[u32] {
    match tokens.split_last() {
        Some((&last, rest)) if last == eos => rest,
        _ => tokens,
    }
}
