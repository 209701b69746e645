//! Storage worker: holds blobs and serves transfers

pub mod blob;
pub mod server;
pub mod transfer;

pub use blob::{BlobStore, DiskBlobStore, MemBlobStore};
pub use server::StorageWorker;
