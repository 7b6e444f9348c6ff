//! Replay command implementation
//!
//! Drives a full generation session from a recorded score trace instead of a
//! neural network. Each trace step holds sparse score overrides on top of a
//! base score; step `n` answers the `n`-th forward pass.

use anyhow::{bail, Context, Result};
use clap::Args;
use console::style;
use serde::Deserialize;
use serde_json::json;
use spindle_core::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tracing::{debug, info};

use crate::commands::Command;
use crate::config::Config;
use crate::utils::{format_duration, format_tokens, print_output, print_warning};

#[derive(Args, Debug)]
pub struct ReplayCommand {
    /// Path to the score trace (JSON)
    pub trace: PathBuf,

    /// Policy file (TOML), overrides the configured default policy
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// Print tokens as they are generated
    #[arg(long)]
    pub stream: bool,
}

/// A recorded sequence of score vectors plus the vocabulary that names them
#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    /// Token strings; a token's id is its index
    pub vocabulary: Vec<String>,
    pub eos_token_id: u32,
    #[serde(default = "default_architecture")]
    pub architecture: ModelArchitecture,
    /// Whitespace-separated vocabulary words
    pub prompt: String,
    /// Score of every token a step does not mention
    #[serde(default)]
    pub base_score: f32,
    pub steps: Vec<HashMap<u32, f32>>,
}

fn default_architecture() -> ModelArchitecture {
    ModelArchitecture::DecoderOnly
}

impl Trace {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to load trace file: {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let trace: Trace = serde_json::from_str(content).context("Failed to parse trace")?;
        trace.validate()?;
        Ok(trace)
    }

    fn validate(&self) -> Result<()> {
        let vocab_size = self.vocabulary.len();
        if vocab_size == 0 {
            bail!("Trace vocabulary is empty");
        }
        if self.eos_token_id as usize >= vocab_size {
            bail!(
                "eos_token_id {} is outside the vocabulary of {} tokens",
                self.eos_token_id,
                vocab_size
            );
        }
        for (step, scores) in self.steps.iter().enumerate() {
            if let Some(token) = scores.keys().find(|&&t| t as usize >= vocab_size) {
                bail!(
                    "Step {} scores token {} outside the vocabulary of {} tokens",
                    step,
                    token,
                    vocab_size
                );
            }
        }
        Ok(())
    }
}

/// Forward pass answering from a trace
pub struct TraceForward {
    vocab_size: usize,
    eos_token_id: u32,
    architecture: ModelArchitecture,
    base_score: f32,
    steps: Vec<HashMap<u32, f32>>,
    cursor: usize,
}

impl TraceForward {
    pub fn new(trace: &Trace) -> Self {
        Self {
            vocab_size: trace.vocabulary.len(),
            eos_token_id: trace.eos_token_id,
            architecture: trace.architecture,
            base_score: trace.base_score,
            steps: trace.steps.clone(),
            cursor: 0,
        }
    }
}

impl ForwardPass for TraceForward {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    fn architecture(&self) -> ModelArchitecture {
        self.architecture
    }

    fn next_scores(&mut self, context: &[u32]) -> anyhow::Result<Vec<f32>> {
        let Some(step) = self.steps.get(self.cursor) else {
            bail!(
                "Trace exhausted after {} steps (context length {})",
                self.steps.len(),
                context.len()
            );
        };
        self.cursor += 1;

        let mut scores = vec![self.base_score; self.vocab_size];
        for (&token, &score) in step {
            scores[token as usize] = score;
        }
        Ok(scores)
    }
}

/// Word-level tokenizer over the trace vocabulary
pub struct TraceTokenizer {
    words: Vec<String>,
    ids: HashMap<String, u32>,
}

impl TraceTokenizer {
    pub fn new(trace: &Trace) -> Self {
        // Later duplicates lose so encoding picks the lowest id
        let mut ids = HashMap::new();
        for (id, word) in trace.vocabulary.iter().enumerate() {
            ids.entry(word.clone()).or_insert(id as u32);
        }
        Self {
            words: trace.vocabulary.clone(),
            ids,
        }
    }
}

impl Tokenizer for TraceTokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        text.split_whitespace()
            .map(|word| {
                self.ids
                    .get(word)
                    .copied()
                    .with_context(|| format!("Unknown word '{}'", word))
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String> {
        let words = tokens
            .iter()
            .map(|&token| self.decode_token(token))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }

    fn decode_token(&self, token: u32) -> anyhow::Result<String> {
        self.words
            .get(token as usize)
            .cloned()
            .with_context(|| format!("Token {} is outside the vocabulary", token))
    }
}

#[derive(Tabled)]
struct MetricEntry {
    metric: String,
    value: String,
}

impl MetricEntry {
    fn new(metric: &str, value: impl ToString) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.to_string(),
        }
    }

    fn duration(metric: &str, ms: u64) -> Self {
        Self::new(metric, format_duration(Duration::from_millis(ms)))
    }
}

impl Command for ReplayCommand {
    fn execute(&self, config: &Config, json_output: bool) -> Result<()> {
        debug!("Executing replay command with config: {:?}", self);

        let trace = Trace::from_file(&self.trace)?;
        let policy = self.resolve_policy(config)?;
        info!(
            "Replaying {} steps over a {} token vocabulary ({})",
            trace.steps.len(),
            trace.vocabulary.len(),
            trace.architecture
        );

        let mut engine = DecodingEngine::load(config.engine.clone(), || {
            let forward: Box<dyn ForwardPass> = Box::new(TraceForward::new(&trace));
            let tokenizer: Box<dyn Tokenizer> = Box::new(TraceTokenizer::new(&trace));
            Ok((forward, tokenizer))
        })?;

        let mut fragments = Vec::new();
        let result = if self.stream {
            let mut sink = |token_id: u32, text: &str, position: usize, is_last: bool| -> Result<()> {
                if json_output {
                    fragments.push(json!({
                        "token_id": token_id,
                        "text": text,
                        "position": position,
                        "is_last": is_last,
                    }));
                } else {
                    print!("{}", text);
                    if is_last {
                        println!();
                    }
                    std::io::stdout().flush()?;
                }
                Ok(())
            };
            engine.generate_stream(&trace.prompt, &policy, &mut sink)
        } else {
            engine.generate(&trace.prompt, &policy)
        };
        let output = result.context("Replay failed")?;

        if json_output {
            let mut report = json!({
                "tokens": output.tokens,
                "text": output.text,
                "finish_reason": output.finish_reason,
                "warnings": output.warnings,
                "metrics": output.metrics,
            });
            if self.stream {
                report["stream"] = json!(fragments);
            }
            return print_output(&report, true);
        }

        self.print_report(&output);
        Ok(())
    }
}

impl ReplayCommand {
    fn resolve_policy(&self, config: &Config) -> Result<GenerationPolicy> {
        match self.policy.as_ref().or(config.default_policy.as_ref()) {
            Some(path) => GenerationPolicy::from_file(path)
                .with_context(|| format!("Invalid policy: {}", path.display())),
            None => {
                debug!("No policy given, using defaults");
                Ok(GenerationPolicy::default())
            }
        }
    }

    fn print_report(&self, output: &GenerationOutput) {
        if !self.stream {
            println!("{}", output.text);
        }
        println!();
        println!("{} {}", style("Tokens:").bold(), format_tokens(&output.tokens));
        println!(
            "{} {}",
            style("Finish reason:").bold(),
            serde_json::to_value(output.finish_reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        );
        for warning in &output.warnings {
            print_warning(warning);
        }

        let m = &output.metrics;
        let entries = vec![
            MetricEntry::duration("init", m.init_time_ms),
            MetricEntry::duration("tokenization", m.tokenization_time_ms),
            MetricEntry::duration("encoder", m.encoder_time_ms),
            MetricEntry::duration("decoder", m.decoder_time_ms),
            MetricEntry::duration("time to first token", m.time_to_first_token_ms),
            MetricEntry::duration("total", m.total_time_ms),
            MetricEntry::new("tokens/sec", format!("{:.1}", m.tokens_per_second)),
            MetricEntry::new("input tokens", m.input_token_count),
            MetricEntry::new("output tokens", m.output_token_count),
        ];
        let mut table = Table::new(entries);
        table.with(Style::rounded());
        println!();
        println!("{}", table);
    }
}
