//! Commands of the `sensorgate` binary.
//!
//! Every mutating command prints the change events it caused as JSON lines.
//! `dump` prints all providers as a JSON array.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensorgate_model::{Provider, ProviderUpdate, TypePackage};
use sensorgate_registry::{
    ProviderHandle, RecordingNotifier, Registry, RegistryConfig, UpdateOutcome,
};
use sensorgate_storage::SqliteStore;
use sensorgate_types::{Timestamp, Value};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "sensorgate")]
#[command(about = "Inspect and feed a SensorGate registry")]
pub struct Args {
    /// Path to the SQLite registry database
    #[arg(short, long, default_value = "sensorgate.db")]
    pub db: PathBuf,

    /// Path to a TOML registry configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the id of the self provider
    #[arg(long)]
    pub self_id: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply JSON-lines update tuples through the low-level path
    Ingest { file: PathBuf },
    /// Merge one provider tree (or an array of them)
    Merge { file: PathBuf },
    /// Register a type package from JSON
    Register { package: PathBuf },
    /// Unregister a type package by URI
    Unregister { uri: String },
    /// Link a provider to another
    Link { parent: String, child: String },
    /// Remove a link
    Unlink { parent: String, child: String },
    /// Delete a provider
    Delete { provider: String },
    /// Print all providers
    Dump,
}

/// One line of an `ingest` file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateLine {
    #[serde(default)]
    pub model: Option<String>,
    pub provider: String,
    pub service: String,
    pub resource: String,
    /// Missing or `null` unsets the resource.
    #[serde(default)]
    pub value: Option<Value>,
    /// Defaults to the time of ingestion.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Trees {
    Many(Vec<ProviderUpdate>),
    One(Box<ProviderUpdate>),
}

/// Loads the registry configuration, or the defaults without a file.
pub fn load_config(path: Option<&Path>) -> Result<RegistryConfig> {
    let Some(path) = path else {
        return Ok(RegistryConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Runs one command and shuts the registry down.
pub fn run(args: &Args, out: &mut impl Write) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(id) = &args.self_id {
        config.self_provider_id = id.clone();
    }
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("failed to open {}", args.db.display()))?;
    let events = Arc::new(RecordingNotifier::new());
    let registry = Registry::builder(Arc::new(store))
        .config(config)
        .notifier(events.clone())
        .build()?;

    let result = execute(&registry, &args.command, &mut *out);
    for event in events.take() {
        serde_json::to_writer(&mut *out, &event)?;
        writeln!(out)?;
    }
    registry.shut_down()?;
    result
}

fn execute(registry: &Registry, command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Ingest { file } => ingest(registry, file),
        Command::Merge { file } => {
            let text = read(file)?;
            let trees = match serde_json::from_str::<Trees>(&text)
                .with_context(|| format!("invalid provider tree in {}", file.display()))?
            {
                Trees::Many(trees) => trees,
                Trees::One(tree) => vec![*tree],
            };
            for tree in &trees {
                registry.save(tree)?;
            }
            info!(providers = trees.len(), "merged provider trees");
            Ok(())
        }
        Command::Register { package } => {
            let package = TypePackage::from_json(&read(package)?)
                .with_context(|| format!("invalid type package {}", package.display()))?;
            registry.register_type_package(package)?;
            Ok(())
        }
        Command::Unregister { uri } => {
            registry.unregister_type_package(uri)?;
            Ok(())
        }
        Command::Link { parent, child } => {
            let changed = registry.link_providers(parent, child, Timestamp::now())?;
            info!(%parent, %child, changed, "link");
            Ok(())
        }
        Command::Unlink { parent, child } => {
            let changed = registry.unlink_providers(parent, child, Timestamp::now())?;
            info!(%parent, %child, changed, "unlink");
            Ok(())
        }
        Command::Delete { provider } => {
            registry.delete_provider(provider)?;
            Ok(())
        }
        Command::Dump => {
            let providers: Vec<Provider> = registry
                .providers()
                .iter()
                .map(ProviderHandle::snapshot)
                .collect();
            serde_json::to_writer_pretty(&mut *out, &providers)?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn ingest(registry: &Registry, file: &Path) -> Result<()> {
    let text = read(file)?;
    let (mut applied, mut unchanged, mut stale) = (0usize, 0usize, 0usize);
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let update: UpdateLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid update", file.display(), number + 1))?;
        let outcome = registry.update_resource(
            update.model.as_deref(),
            &update.provider,
            &update.service,
            &update.resource,
            update.value,
            update.timestamp.unwrap_or_else(Timestamp::now),
        )?;
        debug!(line = number + 1, ?outcome, "ingested update");
        match outcome {
            UpdateOutcome::Applied => applied += 1,
            UpdateOutcome::Unchanged => unchanged += 1,
            UpdateOutcome::Stale => stale += 1,
        }
    }
    info!(applied, unchanged, stale, "ingested updates");
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
