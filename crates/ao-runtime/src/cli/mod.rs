pub mod run;

use clap::{Parser, Subcommand};

/// agentorch — a multi-tenant agent orchestration runtime.
#[derive(Debug, Parser)]
#[command(name = "agentorch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
    /// Send a single message through one turn and print the reply.
    Run {
        /// The message to send.
        message: String,
        /// Session id (a fresh one is created when omitted).
        #[arg(long)]
        session: Option<String>,
        /// Output the full event stream as JSON instead of just the reply.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

/// Path to the config file, read from `AO_CONFIG` (or `config.toml` by
/// default). Shared by every subcommand so the lookup logic lives in one
/// place.
pub fn config_path() -> String {
    std::env::var("AO_CONFIG").unwrap_or_else(|_| "config.toml".into())
}
