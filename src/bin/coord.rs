//! Coordinator binary

use clap::Parser;
use replistore::{Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replistore-coord")]
#[command(about = "replistore coordinator: places files and tracks replicas")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on for workers and clients
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Replication factor
    #[arg(long)]
    replicas: Option<usize>,

    /// Deadline for STORE/REMOVE acknowledgements, in milliseconds
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config from file and environment, then override with CLI arguments
    let mut config = Config::load(args.config.as_deref())?
        .coordinator
        .unwrap_or_default();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(replicas) = args.replicas {
        config.replication_factor = replicas;
    }
    if let Some(ms) = args.ack_timeout_ms {
        config.ack_timeout_ms = ms;
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

    let coordinator = Coordinator::bind(config).await?;

    tokio::select! {
        result = coordinator.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down coordinator");
        }
    }

    Ok(())
}
