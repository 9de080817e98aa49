//! PostMessenger CLI: exercise the protocol from the terminal.

mod cli;
mod demo;

use crate::cli::{Cli, Commands};
use clap::Parser;
use postmessenger_wire::load_config;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Demo {
            calls,
            timeout_ms,
            silent,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(demo::run(
                config,
                demo::DemoOptions {
                    calls,
                    timeout_ms,
                    silent,
                },
            ))
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
