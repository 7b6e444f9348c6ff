//! Check command implementation
//!
//! Loads a generation policy through the same validating constructor the
//! engine uses and reports the effective decoding mode.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use serde_json::json;
use spindle_core::policy::GenerationPolicy;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::{debug, info};

use crate::commands::Command;
use crate::config::Config;
use crate::utils::{print_output, print_success};

#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Path to the policy file (TOML)
    pub policy: PathBuf,
}

#[derive(Tabled)]
struct PolicyEntry {
    field: String,
    value: String,
}

impl PolicyEntry {
    fn new(field: &str, value: impl ToString) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl Command for CheckCommand {
    fn execute(&self, _config: &Config, json_output: bool) -> Result<()> {
        debug!("Executing check command with config: {:?}", self);

        let policy = GenerationPolicy::from_file(&self.policy)
            .with_context(|| format!("Invalid policy: {}", self.policy.display()))?;
        info!("Policy {} is valid", self.policy.display());

        if json_output {
            return print_output(&policy_summary(&policy), true);
        }

        println!("{}", style("Generation Policy").bold().underlined());
        println!("Mode: {}", decoding_mode(&policy));
        println!();

        let mut table = Table::new(policy_entries(&policy));
        table.with(Style::rounded());
        println!("{}", table);

        print_success(&format!("{} is a valid policy", self.policy.display()));
        Ok(())
    }
}

/// Selection strategy the session will use; top-k is always set on a valid
/// policy and takes precedence over top-p
fn decoding_mode(policy: &GenerationPolicy) -> &'static str {
    if policy.is_greedy() {
        "greedy"
    } else {
        "sampling (top-k)"
    }
}

fn policy_summary(policy: &GenerationPolicy) -> serde_json::Value {
    json!({
        "valid": true,
        "mode": decoding_mode(policy),
        "policy": policy,
        "predicates": {
            "is_greedy": policy.is_greedy(),
            "uses_top_k": policy.uses_top_k(),
            "uses_top_p": policy.uses_top_p(),
            "has_repetition_penalty": policy.has_repetition_penalty(),
            "has_min_length": policy.has_min_length(),
            "has_banned_sequences": policy.has_banned_sequences(),
            "is_beam_search": policy.is_beam_search(),
        },
    })
}

fn policy_entries(policy: &GenerationPolicy) -> Vec<PolicyEntry> {
    let beam = policy.beam_search();
    let banned = if policy.has_banned_sequences() {
        policy
            .banned_sequences()
            .iter()
            .map(|seq| format!("{:?}", seq))
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        "none".to_string()
    };

    vec![
        PolicyEntry::new("temperature", policy.temperature()),
        PolicyEntry::new("top_k", policy.top_k()),
        PolicyEntry::new("top_p", policy.top_p()),
        PolicyEntry::new("repetition_penalty", policy.repetition_penalty()),
        PolicyEntry::new("max_output_tokens", policy.max_output_tokens()),
        PolicyEntry::new("min_output_tokens", policy.min_output_tokens()),
        PolicyEntry::new("banned_sequences", banned),
        PolicyEntry::new("num_beams", beam.num_beams),
        PolicyEntry::new("length_penalty", beam.length_penalty),
        PolicyEntry::new("early_stopping", beam.early_stopping),
        PolicyEntry::new("num_return_sequences", beam.num_return_sequences),
        PolicyEntry::new(
            "seed",
            policy
                .seed()
                .map_or_else(|| "entropy".to_string(), |s| s.to_string()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::policy::PolicyParams;

    #[test]
    fn test_decoding_mode() {
        assert_eq!(decoding_mode(&GenerationPolicy::default()), "sampling (top-k)");

        let greedy = GenerationPolicy::create(PolicyParams {
            temperature: 0.0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(decoding_mode(&greedy), "greedy");

        // top_k has no disabled value
        assert!(GenerationPolicy::create(PolicyParams {
            top_k: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_summary_lists_predicates() {
        let policy = GenerationPolicy::create(PolicyParams {
            banned_sequences: Some(vec![vec![5, 6]]),
            ..Default::default()
        })
        .unwrap();
        let summary = policy_summary(&policy);

        assert_eq!(summary["valid"], json!(true));
        assert_eq!(summary["predicates"]["has_banned_sequences"], json!(true));
        assert_eq!(summary["predicates"]["is_beam_search"], json!(false));
        assert_eq!(summary["policy"]["top_k"], json!(50));
    }

    #[test]
    fn test_entries_cover_every_field() {
        let entries = policy_entries(&GenerationPolicy::default());
        assert_eq!(entries.len(), 12);
        assert!(entries
            .iter()
            .any(|e| e.field == "banned_sequences" && e.value == "none"));
        assert!(entries.iter().any(|e| e.field == "seed" && e.value == "entropy"));
    }
}
