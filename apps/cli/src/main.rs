//! chunkferry command-line entry point.

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Chunked, resumable transfers with bounded retry.
#[derive(Debug, Parser)]
#[command(name = "chunkferry", version)]
struct Cli {
    /// Configuration file (default: ~/.config/chunkferry/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a file to an endpoint, resuming an interrupted run
    Send(commands::send::SendArgs),
    /// Accept parts from `chunkferry send --endpoint host:...`
    Receive(commands::receive::ReceiveArgs),
    /// Check a local file's size and SHA-256
    Verify(commands::verify::VerifyArgs),
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the summary line.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(endpoint = %config.endpoint, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Send(args) => rt.block_on(commands::send::run(args, config)),
        Command::Receive(args) => rt.block_on(commands::receive::run(args, &config)).map(|()| 0),
        Command::Verify(args) => commands::verify::run(args),
    }
}
