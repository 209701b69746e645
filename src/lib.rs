//! # replistore
//!
//! A replicated file store with:
//! - A coordinator that places every file on R storage workers
//! - Quorum acknowledgements with a deadline for stores and removals
//! - Load failover across replicas
//! - A newline-delimited text protocol shared by clients and workers
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────────────────┐
//!   client ──▶         Coordinator              │
//!   STORE    │  membership · file index · loads │
//!   LOAD ... └───────┬──────────────────────────┘
//!                    │ JOIN / STORE_ACK / REMOVE
//!   ┌────────────────┼──────────────────┐
//!   │                │                  │
//! ┌─▼─────────┐  ┌───▼───────┐  ┌───────▼───┐
//! │ Worker 1  │  │ Worker 2  │  │ Worker 3  │
//! │  blobs    │  │  blobs    │  │  blobs    │
//! └─────▲─────┘  └─────▲─────┘  └─────▲─────┘
//!       └── client streams file bytes ┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! replistore-coord --bind 0.0.0.0:5000 --replicas 3 --ack-timeout-ms 5000
//! ```
//!
//! ### Start a worker
//! ```bash
//! replistore-worker --bind 0.0.0.0:6001 --coordinator 127.0.0.1:5000 \
//!   --data-dir ./worker-1
//! ```
//!
//! ### Use the CLI
//! ```bash
//! replistore put report.pdf --file ./report.pdf
//! replistore get report.pdf --output ./copy.pdf
//! replistore ls
//! replistore rm report.pdf
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod coordinator;
pub mod worker;

// Re-export commonly used types
pub use client::Client;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use worker::StorageWorker;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
