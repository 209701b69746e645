//! Storage worker binary

use anyhow::Result;
use clap::Parser;
use replistore::worker::DiskBlobStore;
use replistore::{Config, StorageWorker};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replistore-worker")]
#[command(about = "replistore storage worker: holds file replicas")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on for client transfers
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Coordinator address (host:port)
    #[arg(long)]
    coordinator: Option<String>,

    /// Address announced to the coordinator (defaults to the bound port)
    #[arg(long)]
    advertise: Option<String>,

    /// Data directory for blobs
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Per-transfer read/write deadline, in milliseconds
    #[arg(long)]
    io_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?
        .worker
        .unwrap_or_default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(coordinator) = args.coordinator {
        config.coordinator_addr = coordinator;
    }
    if let Some(advertise) = args.advertise {
        config.advertise_addr = Some(advertise);
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(ms) = args.io_timeout_ms {
        config.io_timeout_ms = ms;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(DiskBlobStore::open(&config.data_dir)?);
    let worker = StorageWorker::bind(config, store).await?;

    tokio::select! {
        result = worker.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down worker");
        }
    }

    Ok(())
}
