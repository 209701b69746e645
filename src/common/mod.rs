//! Common utilities and types shared across replistore

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::{ClientConfig, Config, CoordinatorConfig, WorkerConfig};
pub use error::{Error, Result};
pub use protocol::{send, spawn_writer, Message, Outbox};
pub use utils::{encode_name, format_bytes, resolve_worker_addr, validate_name};
