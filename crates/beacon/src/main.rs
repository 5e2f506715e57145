//! Beacon - HTTP edge ingestion service
//!
//! Accepts analytics tracking beacons, normalizes each hit into an event
//! and fans it out to an object-storage sink and a streaming sink in
//! parallel, with an audit record per request.
//!
//! # Usage
//!
//! ```bash
//! # Run the edge with the default config path (config.json)
//! beacon
//!
//! # Run with an explicit config
//! beacon run --config /etc/beacon/config.json
//!
//! # Turn up logging
//! beacon run --log-level debug
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// HTTP edge ingestion service for analytics beacons
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the edge server (default when no subcommand is given)
    Run(cmd::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref().unwrap_or("info"))?;

    match cli.command {
        Some(Command::Run(args)) => cmd::serve::run(args).await,
        None => cmd::serve::run(cmd::serve::ServeArgs::default()).await,
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
