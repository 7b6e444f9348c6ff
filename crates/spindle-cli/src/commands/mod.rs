//! Command implementations for Spindle CLI

pub mod check;
pub mod replay;

use anyhow::Result;

/// Trait for CLI command execution
pub trait Command {
    /// Execute the command
    fn execute(&self, config: &crate::config::Config, json_output: bool) -> Result<()>;
}
