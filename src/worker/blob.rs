//! Local blob storage for a worker
//!
//! One blob per file name. The disk backend keeps each blob in its own file
//! under the data directory, named by the percent-encoded file name.

use crate::common::{encode_name, Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Trait for blob storage backends
pub trait BlobStore: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool>;
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;
    /// `None` if the blob is absent
    fn read(&self, name: &str) -> Result<Option<Bytes>>;
    /// Returns false if the blob was absent
    fn delete(&self, name: &str) -> Result<bool>;
}

/// Distinguishes concurrent writers of the same name
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory-backed store
pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    /// Open or create the data directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| Error::storage(&root.display().to_string(), e))?;
        tracing::info!("Blob store at {}", root.display());
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(encode_name(name))
    }

    fn write_tmp(tmp: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(tmp)?;
        file.write_all(data)?;
        file.sync_all()
    }
}

impl BlobStore for DiskBlobStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name).is_file())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        // write-then-rename so a reader never sees a partial blob.
        // Encoded names only use '%' before two hex digits, so this never
        // collides with a blob.
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!("{}%tmp{}-{}", encode_name(name), std::process::id(), seq));
        let written =
            Self::write_tmp(&tmp, data).and_then(|()| fs::rename(&tmp, self.path(name)));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::storage(name, e));
        }
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path(name)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage(name, e)),
        }
    }

    fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(name, e)),
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
        self.blobs
            .lock()
            .map_err(|_| Error::Internal("blob map poisoned".into()))
    }
}

impl BlobStore for MemBlobStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blobs()?.contains_key(name))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.blobs()?
            .insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Option<Bytes>> {
        Ok(self.blobs()?.get(name).cloned())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.blobs()?.remove(name).is_some())
    }
}
