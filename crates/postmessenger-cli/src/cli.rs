//! Clap CLI definitions for PostMessenger.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  postmessenger demo                       Handshake and five echo calls over the loopback remote
  postmessenger demo --calls 20 --silent   Watch calls time out against a remote that never answers
  postmessenger config                     Print the effective configuration as TOML";

/// PostMessenger: request/acknowledgment calls over a one-way postMessage primitive.
#[derive(Parser)]
#[command(name = "postmessenger", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a channel against the in-process loopback remote.
    Demo {
        /// Number of concurrent echo calls to issue.
        #[arg(long, default_value_t = 5)]
        calls: usize,
        /// Per-call timeout in milliseconds (overrides config; 0 = none).
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Make the remote drop every request.
        #[arg(long)]
        silent: bool,
    },
    /// Print the effective configuration.
    Config,
}
