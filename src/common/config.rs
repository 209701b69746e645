//! Configuration for replistore components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `REPLISTORE_COORDINATOR__REPLICATION_FACTOR=3`.
pub const ENV_PREFIX: &str = "REPLISTORE";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Worker-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Client-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from an optional TOML file, then `REPLISTORE_*`
    /// environment variables. Sections missing from both stay `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );
        Ok(builder.build()?.try_deserialize()?)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Listening address for workers and clients
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// Number of workers every file is written to
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Deadline for STORE and REMOVE quorum
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}
fn default_replication_factor() -> usize {
    3
}
fn default_ack_timeout() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            replication_factor: default_replication_factor(),
            ack_timeout_ms: default_ack_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl CoordinatorConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.ack_timeout_ms == 0 {
            return Err(Error::InvalidConfig("ack_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Storage worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Listening address for client transfers
    #[serde(default = "default_worker_bind")]
    pub bind_addr: SocketAddr,

    /// Coordinator to JOIN
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    /// Address token announced in JOIN. Defaults to the bound port, which
    /// clients resolve against the coordinator's host.
    #[serde(default)]
    pub advertise_addr: Option<String>,

    /// Deadline for each client read or write
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,

    /// Directory holding stored blobs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_worker_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6000))
}
fn default_coordinator_addr() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_io_timeout() -> u64 {
    5_000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./worker-data")
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_worker_bind(),
            coordinator_addr: default_coordinator_addr(),
            advertise_addr: None,
            io_timeout_ms: default_io_timeout(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl WorkerConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_timeout_ms == 0 {
            return Err(Error::InvalidConfig("io_timeout_ms must be > 0".into()));
        }
        if self.coordinator_addr.is_empty() {
            return Err(Error::InvalidConfig("coordinator_addr is empty".into()));
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    /// How long to wait for STORE_COMPLETE / REMOVE_COMPLETE and worker I/O
    #[serde(default = "default_client_timeout")]
    pub timeout_ms: u64,
}

fn default_client_timeout() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: default_coordinator_addr(),
            timeout_ms: default_client_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
