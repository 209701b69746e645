//! CLI for storing and fetching files

use anyhow::Context;
use clap::{Parser, Subcommand};
use replistore::common::{format_bytes, ClientConfig};
use replistore::{Client, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "replistore")]
#[command(about = "replistore replicated file store CLI")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordinator address (host:port)
    #[arg(long)]
    coordinator: Option<String>,

    /// Reply and transfer deadline, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file
    Put {
        /// Name in the store
        name: String,

        /// Local file to upload
        #[arg(long)]
        file: PathBuf,
    },

    /// Fetch a file
    Get {
        /// Name in the store
        name: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Remove a file from every replica
    Rm {
        /// Name in the store
        name: String,
    },

    /// List stored files
    Ls,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config: ClientConfig = Config::load(cli.config.as_deref())?
        .client
        .unwrap_or_default();
    if let Some(coordinator) = cli.coordinator {
        config.coordinator_addr = coordinator;
    }
    if let Some(ms) = cli.timeout_ms {
        config.timeout_ms = ms;
    }

    let mut client = Client::connect(config).await?;

    match cli.command {
        Commands::Put { name, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            client.store(&name, &data).await?;
            println!("Stored {} ({})", name, format_bytes(data.len() as u64));
        }

        Commands::Get { name, output } => {
            let data = client.load(&name).await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Fetched {} ({}) to {}",
                name,
                format_bytes(data.len() as u64),
                output.display()
            );
        }

        Commands::Rm { name } => {
            client.remove(&name).await?;
            println!("Removed {}", name);
        }

        Commands::Ls => {
            let names = client.list().await?;
            if names.is_empty() {
                println!("(no files)");
            }
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
