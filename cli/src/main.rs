//! chainlisten CLI — run the contract listener and inspect its inputs.
//!
//! # Commands
//! ```text
//! chainlisten run    --config configs/config.yaml
//! chainlisten check  --config configs/config.yaml
//! chainlisten events --abi configs/abi.json [--event DepositLend] [--json]
//! chainlisten info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chainlisten_core::{DbConfig, ListenerConfig, ListenerError, SharedStore};
use chainlisten_evm::{ListenerBuilder, SignatureRegistry};
use chainlisten_storage::MemoryStore;

mod logging;

#[derive(Parser)]
#[command(
    name = "chainlisten",
    about = "Contract log listener: historical backfill plus a live subscription",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill, then stream live logs until interrupted
    Run {
        /// Path to the YAML config
        #[arg(short, long, default_value = "configs/config.yaml")]
        config: PathBuf,
    },

    /// Load and validate a config file and its ABI
    Check {
        #[arg(short, long, default_value = "configs/config.yaml")]
        config: PathBuf,
    },

    /// List the event signatures of an ABI file
    Events {
        /// Path to the ABI JSON file
        #[arg(long)]
        abi: PathBuf,
        /// Only these events (repeatable)
        #[arg(long = "event")]
        events: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show build and default settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::Check { config } => cmd_check(&config),
        Commands::Events { abi, events, json } => cmd_events(&abi, &events, json),
        Commands::Info => cmd_info(),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<ListenerConfig> {
    ListenerConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

async fn open_store(db: &DbConfig) -> Result<SharedStore> {
    match db.dsn.as_deref() {
        None => Ok(Arc::new(MemoryStore::new())),
        Some(dsn) => open_sqlite(dsn).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(dsn: &str) -> Result<SharedStore> {
    let store = chainlisten_storage::SqliteStore::open(dsn)
        .await
        .with_context(|| format!("opening store {dsn}"))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(dsn: &str) -> Result<SharedStore> {
    anyhow::bail!("db.dsn is set to '{dsn}' but this build has no `sqlite` feature")
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    logging::init_tracing(&config.log);

    let store = open_store(&config.db).await?;
    tracing::info!(
        contract = %config.contract,
        rpc = %config.rpc_ws,
        workers = config.worker_num,
        "starting listener"
    );

    let listener = ListenerBuilder::from_config(config)
        .store(store)
        .connect()
        .await?;
    let mut running = listener.start().await?;
    tracing::info!(scanned_to = running.scanned_to(), "backfill done, streaming live logs");

    let outcome: Result<(), ListenerError> = tokio::select! {
        err = running.stopped() => Err(err),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "ctrl-c handler failed");
            }
            tracing::info!("interrupt received, shutting down");
            Ok(())
        }
    };

    let metrics = running.shutdown().await;
    tracing::info!(
        handled = metrics.handled,
        duplicates = metrics.duplicates,
        unmatched = metrics.unmatched,
        decode_errors = metrics.decode_errors,
        handler_errors = metrics.handler_errors,
        "final counters"
    );
    Ok(outcome?)
}

fn cmd_check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let registry = SignatureRegistry::from_file(&config.abi_path, &config.events)
        .with_context(|| format!("loading ABI {}", config.abi_path))?;

    println!("Config OK: {}", path.display());
    println!("  rpc_ws:            {}", config.rpc_ws);
    println!("  contract:          {}", config.contract_address()?);
    println!("  workers:           {}", config.worker_num);
    println!("  channel capacity:  {}", config.channel_capacity);
    println!(
        "  scan:              from block {} in chunks of {}",
        config.from_block, config.scan_chunk_size
    );
    println!(
        "  store:             {}",
        config.db.dsn.as_deref().unwrap_or("memory")
    );
    println!("  events:            {}", registry.len());
    for sig in registry.signatures() {
        println!("    {}", sig.signature());
    }
    Ok(())
}

fn cmd_events(abi: &Path, events: &[String], as_json: bool) -> Result<()> {
    let registry = SignatureRegistry::from_file(abi, events)
        .with_context(|| format!("loading ABI {}", abi.display()))?;

    if as_json {
        let out: Vec<_> = registry
            .signatures()
            .into_iter()
            .map(|sig| {
                serde_json::json!({
                    "name": sig.name(),
                    "signature": sig.signature(),
                    "topic0": sig.id().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No events in {}", abi.display());
        return Ok(());
    }
    for sig in registry.signatures() {
        println!("{:<20} {}  {}", sig.name(), sig.id(), sig.signature());
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    let defaults = ListenerConfig::new("", "");
    println!("ChainListen v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Pipeline:");
    println!("  live subscription first, then eth_getLogs backfill up to latest");
    println!("  duplicates from the overlap dropped by (tx hash, log index)");
    println!();
    println!("Defaults:");
    println!("  workers:              {}", defaults.worker_num);
    println!("  channel capacity:     {}", defaults.channel_capacity);
    println!("  scan chunk:           {} blocks", defaults.scan_chunk_size);
    println!("  dial retry:           {} ms", defaults.connect_retry_ms);
    println!("  resubscribe delay:    {} ms", defaults.resubscribe_delay_ms);
    println!();
    println!(
        "Stores:                 memory{}",
        if cfg!(feature = "sqlite") { ", sqlite" } else { "" }
    );
    Ok(())
}
