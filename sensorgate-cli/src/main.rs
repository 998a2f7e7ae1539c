//! SensorGate operator CLI.
//!
//! Runs one command against a registry persisted in SQLite, then shuts the
//! registry down so the result is saved.
//!
//! Usage:
//!   sensorgate --db gateway.db ingest updates.jsonl
//!   sensorgate --db gateway.db dump

use anyhow::Result;
use clap::Parser;
use sensorgate_cli::Args;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    sensorgate_cli::run(&args, &mut out)
}
