//! FHIR Store - cache store backed by a FHIR server

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, EnvOverrides, LoggingConfig};
use fhirstore_core::{FhirServerCacheStore, ResourceKey};
use fhirstore_spi::{
    InitializationContext, MarshallableEntry, NonBlockingStore, TokioBlockingExecutor,
};

/// FHIR Store - persist cache entries to a FHIR server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", env = "FHIRSTORE_CONFIG")]
    config: String,

    #[command(flatten)]
    overrides: EnvOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and ping every backend client
    Check,
    /// Print store state, clients and segments
    Status {
        /// Segments to register before reporting
        #[arg(long, value_delimiter = ',')]
        segments: Vec<u32>,
    },
    /// Load a resource by key, e.g. `Patient/urn:sys|123`
    Load {
        key: String,
        #[arg(long, default_value_t = 0)]
        segment: u32,
    },
    /// Write a resource read from a JSON file
    Write {
        file: PathBuf,
        /// Key to write under; derived from the resource's first identifier when omitted
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 0)]
        segment: u32,
    },
    /// Delete a resource by key
    Delete {
        key: String,
        #[arg(long, default_value_t = 0)]
        segment: u32,
    },
    /// Delete every resource of every persisted type
    Clear {
        /// Confirm the bulk delete
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply_overrides(&args.overrides)?;
    config.resolve_api_key();

    init_logging(&config.logging);

    info!("Starting FHIR Store v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Cluster transport: config file {}, cluster name {}",
        config.cluster.config_file_name.as_deref().unwrap_or("-none-"),
        config.cluster.cluster_name.as_deref().unwrap_or("-none-")
    );

    if matches!(args.command, Command::Check) {
        config.store.live_availability_check = true;
    }

    let executor = Arc::new(TokioBlockingExecutor::current(config.executor.max_in_flight)?);
    let store = FhirServerCacheStore::new();
    store
        .start(InitializationContext::new(Some(config.store.clone()), executor.clone()))
        .await
        .context("Failed to start store")?;

    let result = run(&store, args.command).await;

    store.stop().await?;
    executor.shutdown();
    result
}

async fn run(store: &FhirServerCacheStore, command: Command) -> Result<()> {
    match command {
        Command::Check => {
            if !store.is_available().await? {
                bail!("FHIR server is not available");
            }
            println!("ok");
        }
        Command::Status { segments } => {
            let segments: BTreeSet<u32> = segments.into_iter().collect();
            store.add_segments(&segments).await?;
            print_json(&serde_json::to_value(store.status())?)?;
        }
        Command::Load { key, segment } => {
            let key: ResourceKey = key.parse()?;
            match store.load(segment, &key).await? {
                Some(entry) => {
                    if let Some(expires_at) = entry.expiry_time() {
                        info!("{} expires at {}", key, expires_at);
                    }
                    print_json(entry.value())?;
                }
                None => bail!("{} not found", key),
            }
        }
        Command::Write { file, key, segment } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let resource: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            let key = match key {
                Some(k) => k.parse::<ResourceKey>()?,
                None => ResourceKey::of_resource(&resource)?,
            };

            let outcome = store
                .write(segment, MarshallableEntry::new(key.clone(), resource))
                .await?;
            if !outcome.is_success() {
                bail!("Write of {} failed: {:?}", key, outcome);
            }
            println!("{} {}", outcome.as_str(), key);
        }
        Command::Delete { key, segment } => {
            let key: ResourceKey = key.parse()?;
            if store.delete(segment, &key).await? {
                println!("deleted {}", key);
            } else {
                warn!("{} was not deleted", key);
                println!("not deleted {}", key);
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear without --yes");
            }
            let summary = store.clear().await?;
            print_json(&serde_json::to_value(summary)?)?;
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging. Output goes to stderr so command output stays on stdout.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
