//! Explorer extender
//!
//! Follows a node block by block and keeps addresses, balances, coins,
//! rewards, and slashes in PostgreSQL.

mod config;
mod shutdown;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use extender_core::events::{PipelineSignal, PipelineSignalReceiver, pipeline_signal_channel};
use extender_core::processors::BlockIngestor;
use extender_core::store::PgStore;
use extender_sdk::client::NodeClient;
use shutdown::shutdown_signal;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Explorer extender - block ingestion and balance sync
#[derive(Parser, Debug)]
#[command(name = "extender-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./extender.toml")]
    config: PathBuf,

    /// Override the first block to process
    #[arg(long, env = "EXTENDER_START_HEIGHT")]
    start_height: Option<u64>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting extender-server v{}", env!("CARGO_PKG_VERSION"));

    let loaded_config = ConfigLoader::new(&args.config, args.start_height)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let store = Arc::new(PgStore::new(db_pool.clone()));
    let node = Arc::new(NodeClient::new(loaded_config.node_url.clone()));
    tracing::info!(node = %loaded_config.node_url, "Node client ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (signal_tx, signal_rx) = pipeline_signal_channel();
    let signal_logger = tokio::spawn(log_signals(signal_rx));

    let ingestor = BlockIngestor::spawn(
        store,
        node,
        &loaded_config.pipeline,
        loaded_config.ingest.clone(),
        signal_tx,
        shutdown_rx,
    );
    let ingestor = tokio::spawn(ingestor.run());

    let signal_result = shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = ingestor.await {
        tracing::error!("Ingestor task failed: {}", e);
    }
    // The ingestor dropped the last signal sender on its way out.
    let _ = signal_logger.await;

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Extender shutdown complete");

    signal_result.map_err(Into::into)
}

/// Log settled blocks until every signal sender is gone.
async fn log_signals(mut signal_rx: PipelineSignalReceiver) {
    loop {
        match signal_rx.recv().await {
            Ok(PipelineSignal::BlockSettled(set)) => {
                tracing::info!(
                    height = set.height,
                    addresses = set.len(),
                    "Block balances settled"
                );
            }
            Ok(PipelineSignal::BalancesFetched { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Signal logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,extender_core=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
