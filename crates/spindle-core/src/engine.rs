//! Decoding engine: the blocking and streaming entry points

use crate::{
    config::EngineConfig,
    generation::GenerationOutput,
    metrics::{PerformanceRecorder, PerformanceSnapshot, Phase},
    policy::GenerationPolicy,
    session::{ForwardPass, GenerationSession, StreamingSink, Tokenizer},
    CoreError, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// How the forward pass consumes the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArchitecture {
    /// Prompt encoded once; the decoder context holds only generated tokens
    EncoderDecoder,
    /// The decoder context is the prompt followed by the generated tokens
    DecoderOnly,
}

impl fmt::Display for ModelArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncoderDecoder => write!(f, "encoder-decoder"),
            Self::DecoderOnly => write!(f, "decoder-only"),
        }
    }
}

/// Owns the collaborators and runs one session per request
///
/// Requests run one at a time; concurrent generation needs one engine per
/// request.
pub struct DecodingEngine {
    config: EngineConfig,
    forward: Box<dyn ForwardPass>,
    tokenizer: Box<dyn Tokenizer>,
    /// Carries init timing into the first request only
    recorder: PerformanceRecorder,
    last_metrics: Option<PerformanceSnapshot>,
}

impl DecodingEngine {
    /// Create an engine around collaborators that are already initialized
    pub fn new(
        config: EngineConfig,
        forward: Box<dyn ForwardPass>,
        tokenizer: Box<dyn Tokenizer>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            forward,
            tokenizer,
            recorder: PerformanceRecorder::new(),
            last_metrics: None,
        })
    }

    /// Create an engine, timing collaborator initialization as the init phase
    pub fn load<F>(config: EngineConfig, init: F) -> Result<Self>
    where
        F: FnOnce() -> anyhow::Result<(Box<dyn ForwardPass>, Box<dyn Tokenizer>)>,
    {
        config.validate()?;

        let mut recorder = PerformanceRecorder::new();
        recorder.start(Phase::Init);
        let (forward, tokenizer) = init().map_err(|e| CoreError::Internal {
            code: "ENGINE_INIT_FAILED",
            message: format!("{:#}", e),
            context: "Initializing forward pass and tokenizer".to_string(),
            source: Some(e),
        })?;
        recorder.end(Phase::Init);

        info!(
            "Engine loaded in {} ms ({}, vocab {})",
            recorder.phase_duration(Phase::Init).as_millis(),
            forward.architecture(),
            forward.vocab_size()
        );

        Ok(Self {
            config,
            forward,
            tokenizer,
            recorder,
            last_metrics: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn architecture(&self) -> ModelArchitecture {
        self.forward.architecture()
    }

    pub fn vocab_size(&self) -> usize {
        self.forward.vocab_size()
    }

    pub fn eos_token_id(&self) -> u32 {
        self.forward.eos_token_id()
    }

    /// Metrics of the most recent request, including failed ones
    pub fn metrics(&self) -> Option<PerformanceSnapshot> {
        self.last_metrics
    }

    /// Generate to completion and return all tokens and the final text
    pub fn generate(&mut self, prompt: &str, policy: &GenerationPolicy) -> Result<GenerationOutput> {
        self.run(prompt, policy, None)
    }

    /// Generate, delivering every token to `sink` as it is produced
    pub fn generate_stream(
        &mut self,
        prompt: &str,
        policy: &GenerationPolicy,
        sink: &mut dyn StreamingSink,
    ) -> Result<GenerationOutput> {
        self.run(prompt, policy, Some(sink))
    }

    fn run(
        &mut self,
        prompt: &str,
        policy: &GenerationPolicy,
        mut sink: Option<&mut dyn StreamingSink>,
    ) -> Result<GenerationOutput> {
        let mut recorder = self.recorder.clone();
        // Later requests run on a warm engine and report no init time
        self.recorder.reset();

        recorder.start(Phase::Tokenization);
        let prompt_tokens = match self.tokenizer.encode(prompt) {
            Ok(tokens) => tokens,
            Err(e) => {
                let err = CoreError::Generation {
                    code: "TOKENIZATION_FAILED",
                    message: format!("{:#}", e),
                    context: "Tokenizing prompt".to_string(),
                    suggestion: "Check the prompt text and the tokenizer".to_string(),
                    session_id: None,
                    step: None,
                    source: Some(e),
                };
                if let Some(sink) = sink.as_mut() {
                    if let Err(sink_err) = sink.on_error(&err) {
                        warn!("Streaming sink failed to accept error: {:#}", sink_err);
                    }
                }
                self.last_metrics = Some(recorder.snapshot());
                return Err(err);
            }
        };
        recorder.end(Phase::Tokenization);
        debug!("Prompt tokenized into {} tokens", prompt_tokens.len());

        let mut session =
            GenerationSession::new(policy.clone(), &self.config)?.with_recorder(recorder);
        let result = session.run(
            self.forward.as_mut(),
            &prompt_tokens,
            Some(self.tokenizer.as_ref()),
            sink,
        );
        self.last_metrics = Some(session.recorder().snapshot());
        result
    }
}
