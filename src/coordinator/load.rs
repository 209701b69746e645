//! Load sessions: which replicas a client has already been offered
//!
//! A LOAD starts a fresh session at the first replica; every RELOAD offers the
//! next replica in placement order until none are left.

use crate::common::{Error, Result};
use crate::coordinator::index::FileRecord;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// LOAD: start over from the first replica
    Fresh,
    /// RELOAD: the previous offer failed, advance
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSession {
    /// Replicas offered so far
    pub attempted: usize,
    pub replica_count: usize,
}

/// A replica handed to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOffer {
    pub address: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct LoadSessions {
    sessions: HashMap<String, LoadSession>,
}

impl LoadSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the next untried replica of a stored file.
    pub fn next_offer(&mut self, record: &FileRecord, kind: LoadKind) -> Result<LoadOffer> {
        let replica_count = record.replicas.len();
        if kind == LoadKind::Fresh && self.sessions.remove(&record.name).is_some() {
            tracing::debug!("{}: discarding previous load session", record.name);
        }

        let session = self
            .sessions
            .entry(record.name.clone())
            .or_insert(LoadSession {
                attempted: 0,
                replica_count,
            });

        if session.attempted >= session.replica_count {
            self.sessions.remove(&record.name);
            return Err(Error::LoadExhausted(record.name.clone()));
        }

        let address = record.replicas[session.attempted].clone();
        session.attempted += 1;

        Ok(LoadOffer {
            address,
            size: record.size,
        })
    }

    pub fn discard(&mut self, name: &str) {
        self.sessions.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&LoadSession> {
        self.sessions.get(name)
    }
}
