//! field-collect: offline-first collection capture and sync
//!
//! Records collections into the local queue and delivers them to the ledger
//! when connectivity allows. `run` keeps a scheduler alive that drains on a
//! timer with backoff; the other subcommands are one-shot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use field_collect::config::Config;
use field_collect::sync::{HttpLedgerClient, SyncEngine, SyncEngineConfig, SyncScheduler, SyncTrigger};
use field_collect::{CaptureController, CollectionForm, LocationCapture, PendingRecordStore, ProofStore};

#[derive(Parser)]
#[command(name = "field-collect")]
#[command(about = "Offline-first capture and sync for field revenue collection")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "field-collect.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "FIELD_COLLECT_DATA_DIR")]
    data_dir: Option<String>,

    /// Ledger base URL (overrides config file)
    #[arg(long, env = "FIELD_COLLECT_LEDGER_URL")]
    ledger_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a collection
    Submit {
        /// Payer reference
        #[arg(long)]
        client: String,

        /// Amount in minor currency units
        #[arg(long, allow_hyphen_values = true)]
        amount: i64,

        /// cash, mobile_money, bank_transfer or cheque
        #[arg(long, default_value = "cash")]
        method: String,

        #[arg(long)]
        description: Option<String>,

        /// Proof file (receipt photo, signed slip)
        #[arg(long)]
        proof: Option<PathBuf>,

        /// How long to wait for the background sync before exiting
        #[arg(long, default_value_t = 5)]
        wait_secs: u64,
    },

    /// Show how many records are waiting to sync
    Depth,

    /// List queued records
    List,

    /// Drain the queue once and print the report
    Sync,

    /// Show records the ledger rejected
    Rejected {
        /// Empty the rejection log after printing
        #[arg(long)]
        purge: bool,
    },

    /// Keep syncing in the background until interrupted
    Run,

    /// Delete every queued record
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("field_collect=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if std::path::Path::new(&cli.config).exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config))?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    if let Some(data_dir) = cli.data_dir {
        config.device.data_dir = PathBuf::from(data_dir);
    }
    if let Some(ledger_url) = cli.ledger_url {
        config.ledger.base_url = ledger_url;
    }

    info!(device = %config.device.id, data_dir = %config.device.data_dir.display(), "Starting field-collect");

    let store = Arc::new(PendingRecordStore::new(config.queue_db_path()));
    store.open().await.context("could not open the local queue")?;

    let ledger = Arc::new(HttpLedgerClient::new(config.ledger.clone())?);
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        ledger,
        SyncEngineConfig::from(&config),
    ));

    match cli.command {
        Command::Submit {
            client,
            amount,
            method,
            description,
            proof,
            wait_secs,
        } => {
            let proof_artifact_ref = match proof {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    let proofs = ProofStore::new(config.proofs_dir()).await?;
                    Some(proofs.put(&bytes).await?)
                }
                None => None,
            };

            let controller = CaptureController::new(
                store.clone(),
                engine.clone(),
                LocationCapture::from_config(&config.location),
                config.location.policy,
            );

            let receipt = controller
                .submit(CollectionForm {
                    client_id: client,
                    amount,
                    description,
                    payment_method: method,
                    proof_artifact_ref,
                })
                .await?;

            println!("Saved {}", receipt.record.id);
            if let Some(reason) = &receipt.location_failure {
                println!("  without location: {}", reason);
            }

            if let Some(handle) = receipt.background_sync {
                match tokio::time::timeout(Duration::from_secs(wait_secs), handle).await {
                    Ok(Ok(Ok(report))) if report.succeeded.contains(&receipt.record.id) => {
                        println!("  synced");
                    }
                    _ => println!("  pending sync"),
                }
            }
            println!("Queue depth: {}", controller.queue_depth().await?);
        }

        Command::Depth => {
            println!("{}", store.count().await?);
        }

        Command::List => {
            for record in store.list_pending().await? {
                println!(
                    "{}  {}  {:>12}  {:<13}  {}  {}",
                    record.id,
                    record.collected_at.format("%Y-%m-%d %H:%M"),
                    record.amount,
                    record.payment_method,
                    record.client_id,
                    if record.geo.is_some() { "geo" } else { "no-geo" },
                );
            }
        }

        Command::Sync => {
            let report = engine.drain_once().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("Queue depth: {}", store.count().await?);
        }

        Command::Rejected { purge } => {
            for entry in store.list_rejected().await? {
                println!(
                    "{}  {}  {}  {}  {}",
                    entry.record.id,
                    entry.rejected_at.format("%Y-%m-%d %H:%M"),
                    entry.record.client_id,
                    entry.record.amount,
                    entry.reason,
                );
            }
            if purge {
                let n = store.purge_rejected().await?;
                println!("Purged {} rejected records", n);
            }
        }

        Command::Run => {
            let (scheduler, handle) = SyncScheduler::new(engine.clone(), &config.sync);
            let task = tokio::spawn(scheduler.run());
            handle.trigger(SyncTrigger::Resume);

            tokio::signal::ctrl_c().await?;
            info!("Interrupted, stopping scheduler");
            drop(handle);
            task.await?;
        }

        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear the queue without --yes");
            }
            let n = store.clear().await?;
            println!("Removed {} queued records", n);
        }
    }

    Ok(())
}
