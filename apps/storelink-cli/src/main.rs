//! # Storelink Operator CLI
//!
//! Thin orchestration layer over the sync pipeline: everything the operator
//! can do maps 1:1 onto a pipeline or reference-service call.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use storelink_core::SyncResource;
use storelink_db::{Database, DbConfig};
use storelink_sync::reference::ReferenceService;
use storelink_sync::scheduler::OrderQueueDrain;
use storelink_sync::{run_to_completion, BridgeConfig, ErpClient, SyncPipeline, SyncResult};

// =============================================================================
// CLI Definition
// =============================================================================

#[derive(Parser)]
#[command(name = "storelink")]
#[command(about = "Storefront ⇄ ERP synchronization bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the bridge configuration file
    #[arg(short, long, env = "STORELINK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one resource synchronization to completion
    Sync {
        /// Resource category to synchronize
        resource: Resource,
    },
    /// Show the current run status per resource
    Status,
    /// Full reset: clear every remote mapping and cursor for a resync from scratch
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Refresh a cached reference list from the ERP and print it
    Refresh {
        /// Which list to refresh
        list: ReferenceList,
    },
    /// Drop the TTL-cached reference payloads (VAT rates, address types, conf parameters)
    PurgeCache,
    /// Queue an order for immediate synchronization
    QueueOrder {
        /// Storefront order id
        order_id: i64,
    },
    /// Drain the immediate-order queue
    DrainQueue {
        /// Keep draining on the regular cadence until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Resource {
    Products,
    Orders,
    Stocks,
}

impl From<Resource> for SyncResource {
    fn from(value: Resource) -> Self {
        match value {
            Resource::Products => SyncResource::Products,
            Resource::Orders => SyncResource::Orders,
            Resource::Stocks => SyncResource::Stocks,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ReferenceList {
    Warehouses,
    ProductGroups,
    PaymentTypes,
    AddressTypes,
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> SyncResult<()> {
    let config = BridgeConfig::load(cli.config)?;

    let db = Database::new(DbConfig::new(&config.database.path)).await?;
    let client = ErpClient::new(config.erp.clone())?;
    let pipeline = SyncPipeline::new(db, client, config);

    match cli.command {
        Commands::Sync { resource } => {
            let resource: SyncResource = resource.into();
            let run = run_to_completion(&pipeline, resource).await?;
            println!("{}: {}", resource, run.status_line);
        }

        Commands::Status => {
            for resource in [
                SyncResource::Products,
                SyncResource::Orders,
                SyncResource::Stocks,
            ] {
                let run = pipeline.status(resource).await?;
                let status_line = if run.status_line.is_empty() {
                    "never synced".to_string()
                } else {
                    run.status_line.clone()
                };
                println!(
                    "{:<10} {:<12} {}",
                    resource.to_string(),
                    run.status.as_str(),
                    status_line
                );
            }
        }

        Commands::Reset { yes } => {
            if !yes {
                eprintln!(
                    "This clears every remote mapping and cursor; the next sync \
                     recreates all remote records from scratch. Re-run with --yes to confirm."
                );
                std::process::exit(2);
            }
            pipeline.reset().await?;
            println!("All synchronization data has been cleared.");
        }

        Commands::Refresh { list } => {
            let reference = ReferenceService::new(pipeline.client(), pipeline.database());
            let result = match list {
                ReferenceList::Warehouses => reference.warehouses().await?,
                ReferenceList::ProductGroups => reference.product_groups().await?,
                ReferenceList::PaymentTypes => reference.payment_types().await?,
                ReferenceList::AddressTypes => reference
                    .address_types()
                    .await?
                    .map(|m| m.into_iter().map(|(k, v)| (k.to_string(), v)).collect()),
            };

            match result {
                Ok(items) => {
                    let mut items: Vec<_> = items.into_iter().collect();
                    items.sort();
                    for (id, name) in items {
                        println!("{id:<8} {name}");
                    }
                }
                Err(outcome) => warn!(?outcome, "Could not refresh list from ERP"),
            }
        }

        Commands::PurgeCache => {
            pipeline.database().reference().purge_ttl_caches().await?;
            println!("Cache successfully purged.");
        }

        Commands::QueueOrder { order_id } => {
            if pipeline.enqueue_paid_order(order_id).await? {
                println!("Order {order_id} queued for immediate sync.");
            } else {
                println!(
                    "Order {order_id} not queued (already synced, or immediate sync disabled)."
                );
            }
        }

        Commands::DrainQueue { watch } => {
            if watch {
                let pipeline = Arc::new(pipeline);
                let (drain, handle) = OrderQueueDrain::new(pipeline);
                let task = tokio::spawn(drain.run());

                info!("Watching the order queue; press ctrl-c to stop");
                tokio::signal::ctrl_c().await?;

                handle.shutdown().await?;
                let _ = task.await;
            } else {
                let synced = pipeline.sync_queued_orders().await?;
                println!("Synced {synced} queued order(s).");
            }
        }
    }

    Ok(())
}
