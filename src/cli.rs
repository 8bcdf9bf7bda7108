//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// converge - event-driven reconciliation engine
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Event-driven reconciliation engine")]
#[command(
    long_about = "converge routes events through an in-process bus into a deduplicating work queue and drives registered reconcilers until resources converge."
)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the event bus and controller until interrupted (default)
    Run,

    /// Load and validate the configuration, then print it
    CheckConfig,
}

impl Cli {
    /// The selected command, defaulting to `run`.
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
