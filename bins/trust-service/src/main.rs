//! trust-service binary.
//!
//! Starts the wallet trust-scoring pipeline: opens the SQLite store, wires
//! the chain indexer, scoring engine, reputation publisher, and webhook
//! transport, then runs the background scheduler until shutdown.

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use trust_chain::indexer::Indexer;
use trust_engine::{
    config::ServiceConfig, DisabledBasenameResolver, DisabledChainWriter, DisabledCodeHost,
    HttpRpcClient, HttpWebhookTransport, Publisher, Scheduler, ScoringEngine,
};
use trust_store::AsyncDb;

const TRANSFER_CHECKPOINT_KEY: &str = "transfer_indexer_checkpoint";
const TRANSFER_CHUNK_SIZE_KEY: &str = "transfer_indexer_chunk_size";

/// trust-service — background wallet trust-scoring pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "trust-service",
    version,
    about = "Wallet trust-scoring pipeline for an L2 micro-payment protocol"
)]
struct Args {
    /// Data directory for the SQLite store and indexer checkpoints.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// JSON-RPC endpoint of the L2 chain.
    #[arg(long)]
    rpc_url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json").
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn apply_to(self, mut config: ServiceConfig) -> ServiceConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(rpc_url) = self.rpc_url {
            config.rpc_url = rpc_url;
        }
        config.log_level = self.log_level;
        config.log_json = self.log_format == "json";
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = ServiceConfig::from_env().unwrap_or_default();
    let config = args.apply_to(config);

    init_logging(&config.log_level, config.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "trust-service starting");
    info!(data_dir = %config.data_dir.display(), rpc_url = %config.rpc_url, "configuration loaded");

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {e}");
        process::exit(1);
    }

    let store = match AsyncDb::open(&config.db_path().to_string_lossy()).await {
        Ok(db) => db,
        Err(e) => {
            error!("failed to open store: {e}");
            process::exit(1);
        }
    };
    info!("store opened");

    let rpc = match HttpRpcClient::new(&config.rpc_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("failed to construct rpc client: {e}");
            process::exit(1);
        }
    };

    let indexer = Indexer::new(TRANSFER_CHECKPOINT_KEY, TRANSFER_CHUNK_SIZE_KEY, Arc::clone(&rpc), store.clone());

    let engine = Arc::new(ScoringEngine::new(
        store.clone(),
        rpc,
        Arc::new(DisabledCodeHost),
        Arc::new(DisabledBasenameResolver),
    ));

    let publisher = Publisher::new(store.clone(), DisabledChainWriter);
    let webhook_transport = HttpWebhookTransport::new();

    let scheduler = Scheduler::new(store, indexer, Arc::clone(&engine), publisher, webhook_transport);

    info!("trust-service running (Ctrl+C to stop)");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
        let _ = shutdown_tx.send(());
    };

    tokio::select! {
        _ = scheduler.run(shutdown_rx) => {
            info!("scheduler exited");
        }
        _ = shutdown_signal => {}
    }

    info!("trust-service shutdown complete");
}

/// Initialize tracing with the given level and output format.
///
/// Pass `json = true` for structured JSON log lines suitable for log
/// aggregation pipelines; otherwise emits human-readable text.
fn init_logging(level_str: &str, json: bool) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if json {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
