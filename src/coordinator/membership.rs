//! Membership registry: joined storage workers and their placement load
//!
//! Workers are kept in registration order. Replica selection ranks them by
//! how many files they have been chosen for, breaking ties by registration
//! order, so placement is reproducible for a given join sequence.

use crate::common::{Error, Outbox, Result};

/// A joined storage worker
#[derive(Debug)]
pub struct WorkerEntry {
    /// Advertised address, unique per worker
    pub address: String,
    /// Connection held for coordinator-initiated orders
    pub outbox: Outbox,
    /// Times chosen as a replica target. Never decremented.
    pub file_count: u64,
}

#[derive(Debug, Default)]
pub struct Membership {
    workers: Vec<WorkerEntry>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-joining under a known address replaces the
    /// connection and keeps the slot and load metric.
    pub fn join(&mut self, address: String, outbox: Outbox) {
        match self.workers.iter_mut().find(|w| w.address == address) {
            Some(existing) => {
                tracing::warn!("Worker {} re-joined, replacing its connection", address);
                existing.outbox = outbox;
            }
            None => {
                tracing::info!("Worker {} joined", address);
                self.workers.push(WorkerEntry {
                    address,
                    outbox,
                    file_count: 0,
                });
            }
        }
    }

    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Choose `k` distinct workers with the lowest load and charge each of
    /// them one file.
    pub fn select_replicas(&mut self, k: usize) -> Result<Vec<String>> {
        if self.workers.len() < k {
            return Err(Error::InsufficientWorkers {
                needed: k,
                available: self.workers.len(),
            });
        }

        let mut ranked: Vec<usize> = (0..self.workers.len()).collect();
        // stable: equal loads keep registration order
        ranked.sort_by_key(|&i| self.workers[i].file_count);

        let selected = ranked
            .into_iter()
            .take(k)
            .map(|i| {
                let worker = &mut self.workers[i];
                worker.file_count += 1;
                worker.address.clone()
            })
            .collect();

        Ok(selected)
    }

    /// Connection of a joined worker
    pub fn outbox(&self, address: &str) -> Option<&Outbox> {
        self.workers
            .iter()
            .find(|w| w.address == address)
            .map(|w| &w.outbox)
    }

    pub fn file_count(&self, address: &str) -> Option<u64> {
        self.workers
            .iter()
            .find(|w| w.address == address)
            .map(|w| w.file_count)
    }
}
