//! Command line of the fleet agent, built on clap.
//!
//! [`Cli`] carries the global flags (`--config`, `--device-name`,
//! `--verbose`, `--json-logs`) and a [`Command`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// On-device agent that executes firmware deployment jobs.
#[derive(Debug, Parser)]
#[command(name = "fleet-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the agent configuration file.
    #[arg(long, short, global = true, default_value = "agent.toml")]
    pub config: PathBuf,

    /// Device name; overrides DEVICE_NAME and the configuration file.
    #[arg(long, global = true)]
    pub device_name: Option<String>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Connect to the broker and execute jobs until stopped.
    Run,

    /// Print the resolved configuration as TOML.
    Config,
}
