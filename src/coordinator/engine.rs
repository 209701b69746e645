//! Replica-placement and quorum engine
//!
//! Owns every piece of coordinator state. It is driven by exactly one task
//! (see `service`), so nothing here is locked. Quorum waits are `oneshot`
//! completions resolved by the acknowledgement that reaches quorum; the
//! deadline is enforced by whoever holds the receiver.

use crate::common::{send, Error, Message, Outbox, Result};
use crate::coordinator::index::{AckProgress, FileIndex, FileState};
use crate::coordinator::load::{LoadKind, LoadOffer, LoadSessions};
use crate::coordinator::membership::Membership;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Resolved once the operation reaches quorum. Dropped unresolved if the
/// operation is abandoned.
pub type Completion = oneshot::Receiver<()>;

/// Accepted STORE: where the client must push the bytes
#[derive(Debug)]
pub struct StorePlan {
    pub replicas: Vec<String>,
    pub completion: Completion,
}

pub struct Engine {
    replication_factor: usize,
    membership: Membership,
    index: FileIndex,
    loads: LoadSessions,
    store_waiters: HashMap<String, oneshot::Sender<()>>,
    remove_waiters: HashMap<String, oneshot::Sender<()>>,
}

impl Engine {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor,
            membership: Membership::new(),
            index: FileIndex::new(),
            loads: LoadSessions::new(),
            store_waiters: HashMap::new(),
            remove_waiters: HashMap::new(),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn join(&mut self, address: String, outbox: Outbox) {
        self.membership.join(address, outbox);
    }

    pub fn worker_count(&self) -> usize {
        self.membership.count()
    }

    pub fn file_state(&self, name: &str) -> Option<FileState> {
        self.index.get(name).map(|r| r.state)
    }

    fn ensure_workers(&self) -> Result<()> {
        let available = self.membership.count();
        if available < self.replication_factor {
            return Err(Error::InsufficientWorkers {
                needed: self.replication_factor,
                available,
            });
        }
        Ok(())
    }

    /// Names of fully stored files
    pub fn list(&self) -> Result<Vec<String>> {
        self.ensure_workers()?;
        Ok(self.index.stored_names())
    }

    pub fn begin_store(&mut self, name: &str, size: u64) -> Result<StorePlan> {
        if self.index.contains(name) {
            return Err(Error::FileAlreadyExists(name.to_string()));
        }
        self.ensure_workers()?;

        let replicas = self.membership.select_replicas(self.replication_factor)?;
        self.index.begin_store(name, size, replicas.clone())?;

        let (tx, completion) = oneshot::channel();
        self.store_waiters.insert(name.to_string(), tx);

        tracing::info!("{}: storing {} bytes to {:?}", name, size, replicas);
        Ok(StorePlan {
            replicas,
            completion,
        })
    }

    pub fn store_ack(&mut self, name: &str, from: &str) -> Result<AckProgress> {
        let progress = self.index.ack_store(name, from)?;
        match progress {
            AckProgress::Pending { acked, required } => {
                tracing::debug!("{}: {}/{} store ACKs received", name, acked, required);
            }
            AckProgress::Complete => {
                tracing::info!("{}: stored", name);
                if let Some(waiter) = self.store_waiters.remove(name) {
                    let _ = waiter.send(());
                }
            }
        }
        Ok(progress)
    }

    /// STORE deadline passed. Rolls the record back if it is still storing;
    /// returns false if it reached quorum in the meantime.
    pub fn expire_store(&mut self, name: &str) -> bool {
        let rolled_back = self.index.rollback_store(name);
        if rolled_back {
            self.store_waiters.remove(name);
            tracing::warn!("{}: store timed out, record rolled back", name);
        }
        rolled_back
    }

    pub fn load(&mut self, name: &str, kind: LoadKind) -> Result<LoadOffer> {
        let record = self
            .index
            .get(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        if record.state != FileState::Stored {
            return Err(Error::InvalidState {
                name: name.to_string(),
                state: record.state.to_string(),
            });
        }
        self.loads.next_offer(record, kind)
    }

    /// Mark a stored file as removing and order every replica to delete it.
    pub fn begin_remove(&mut self, name: &str) -> Result<Completion> {
        let replicas = self.index.begin_remove(name)?;
        self.loads.discard(name);

        let (tx, completion) = oneshot::channel();
        self.remove_waiters.insert(name.to_string(), tx);

        let order = Message::Remove(name.to_string());
        for address in &replicas {
            let delivered = self
                .membership
                .outbox(address)
                .map(|outbox| send(outbox, &order))
                .unwrap_or(false);
            if !delivered {
                tracing::warn!("{}: could not deliver remove order to {}", name, address);
            }
        }

        tracing::info!("{}: removing from {:?}", name, replicas);
        Ok(completion)
    }

    pub fn remove_ack(&mut self, name: &str, from: &str) -> Result<AckProgress> {
        let progress = self.index.ack_remove(name, from)?;
        match progress {
            AckProgress::Pending { acked, required } => {
                tracing::debug!("{}: {}/{} remove ACKs received", name, acked, required);
            }
            AckProgress::Complete => {
                tracing::info!("{}: removed", name);
                if let Some(waiter) = self.remove_waiters.remove(name) {
                    let _ = waiter.send(());
                }
            }
        }
        Ok(progress)
    }

    /// REMOVE deadline passed. The waiting client is released; the record
    /// stays `Removing`. Returns false if the removal completed meanwhile.
    pub fn expire_remove(&mut self, name: &str) -> bool {
        if !self.index.contains(name) {
            return false;
        }
        self.remove_waiters.remove(name);
        tracing::warn!(
            "{}: remove timed out in state {:?}, record kept",
            name,
            self.file_state(name)
        );
        true
    }
}
