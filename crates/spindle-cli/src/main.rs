//! Spindle CLI - command line interface for the Spindle decoding policy engine
//!
//! Validates generation policies and replays recorded score traces through a
//! full generation session.

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use spindle_core::config::LogLevel;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

mod commands;
mod config;
mod utils;

use commands::{check::CheckCommand, replay::ReplayCommand, Command};

#[derive(Parser)]
#[command(
    name = "spindle",
    version = env!("CARGO_PKG_VERSION"),
    about = "Spindle decoding policy engine CLI",
    long_about = "Validate generation policies and replay recorded score traces through the decoding engine."
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// JSON output format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a generation policy file
    #[command(name = "check", alias = "c")]
    Check(CheckCommand),

    /// Replay a recorded score trace through a generation session
    #[command(name = "replay", alias = "r")]
    Replay(ReplayCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match config::Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    init_logging(&cli, config.engine.logging.level)?;

    debug!("Spindle CLI v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Configuration loaded: {:?}", config);

    let result = match &cli.command {
        Commands::Check(cmd) => cmd.execute(&config, cli.json),
        Commands::Replay(cmd) => cmd.execute(&config, cli.json),
    };

    match result {
        Ok(_) => {
            if !cli.quiet {
                info!("Command completed successfully");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Command line flags win over the configured level
fn init_logging(cli: &Cli, configured: LogLevel) -> Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else if cli.quiet {
        Level::ERROR
    } else {
        match configured {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
