//! File index: per-file replication state
//!
//! ```text
//! absent ──STORE──▶ Storing(0,R) ──R acks──▶ Stored ──REMOVE──▶ Removing(0,D) ──D acks──▶ absent
//!                        │
//!                        └──deadline──▶ absent
//! ```

use crate::common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Storing { acked: usize, required: usize },
    Stored,
    Removing { acked: usize, required: usize },
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileState::Storing { acked, required } => write!(f, "storing {}/{}", acked, required),
            FileState::Stored => write!(f, "stored"),
            FileState::Removing { acked, required } => {
                write!(f, "removing {}/{}", acked, required)
            }
        }
    }
}

/// Metadata for one file
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub name: String,
    pub state: FileState,
    pub size: u64,
    /// Fixed at STORE time, in placement order
    pub replicas: Vec<String>,
    /// Replicas that acknowledged the current phase (store or remove)
    pub acked_by: HashSet<String>,
}

impl FileRecord {
    /// Record `from`'s acknowledgement and return how many replicas have
    /// acknowledged so far. Each replica counts once per phase.
    fn accept_ack(&mut self, from: &str) -> Result<usize> {
        if !self.replicas.iter().any(|r| r == from) {
            return Err(Error::NonPendingAck(format!(
                "{} from {}, not a replica",
                self.name, from
            )));
        }
        if !self.acked_by.insert(from.to_string()) {
            return Err(Error::NonPendingAck(format!(
                "{} from {}, already acknowledged",
                self.name, from
            )));
        }
        Ok(self.acked_by.len())
    }
}

/// Result of counting one acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckProgress {
    Pending { acked: usize, required: usize },
    /// The acknowledgement that reached quorum
    Complete,
}

#[derive(Debug, Default)]
pub struct FileIndex {
    files: HashMap<String, FileRecord>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.files.get(name)
    }

    /// Create a record in `Storing(0, replicas.len())`.
    pub fn begin_store(&mut self, name: &str, size: u64, replicas: Vec<String>) -> Result<()> {
        if self.files.contains_key(name) {
            return Err(Error::FileAlreadyExists(name.to_string()));
        }
        let record = FileRecord {
            name: name.to_string(),
            state: FileState::Storing {
                acked: 0,
                required: replicas.len(),
            },
            size,
            replicas,
            acked_by: HashSet::new(),
        };
        self.files.insert(name.to_string(), record);
        Ok(())
    }

    /// Count one STORE_ACK from replica `from`.
    pub fn ack_store(&mut self, name: &str, from: &str) -> Result<AckProgress> {
        let record = self
            .files
            .get_mut(name)
            .ok_or_else(|| Error::NonPendingAck(name.to_string()))?;
        let required = match record.state {
            FileState::Storing { required, .. } => required,
            _ => return Err(Error::NonPendingAck(name.to_string())),
        };

        let acked = record.accept_ack(from)?;
        if acked >= required {
            record.state = FileState::Stored;
            Ok(AckProgress::Complete)
        } else {
            record.state = FileState::Storing { acked, required };
            Ok(AckProgress::Pending { acked, required })
        }
    }

    /// Drop a record whose STORE missed its deadline. Returns false, leaving
    /// the record untouched, if it is no longer `Storing`.
    pub fn rollback_store(&mut self, name: &str) -> bool {
        match self.files.get(name).map(|r| r.state) {
            Some(FileState::Storing { .. }) => {
                self.files.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Move a `Stored` file to `Removing(0, D)` and return its replicas.
    pub fn begin_remove(&mut self, name: &str) -> Result<Vec<String>> {
        let record = self
            .files
            .get_mut(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        if record.state != FileState::Stored {
            return Err(Error::InvalidState {
                name: name.to_string(),
                state: record.state.to_string(),
            });
        }
        record.state = FileState::Removing {
            acked: 0,
            required: record.replicas.len(),
        };
        record.acked_by.clear();
        Ok(record.replicas.clone())
    }

    /// Count one REMOVE_ACK from replica `from`. The record is deleted on the
    /// one that reaches quorum.
    pub fn ack_remove(&mut self, name: &str, from: &str) -> Result<AckProgress> {
        let record = self
            .files
            .get_mut(name)
            .ok_or_else(|| Error::NonPendingAck(name.to_string()))?;
        let required = match record.state {
            FileState::Removing { required, .. } => required,
            _ => return Err(Error::NonPendingAck(name.to_string())),
        };

        let acked = record.accept_ack(from)?;
        if acked >= required {
            self.files.remove(name);
            Ok(AckProgress::Complete)
        } else {
            record.state = FileState::Removing { acked, required };
            Ok(AckProgress::Pending { acked, required })
        }
    }

    /// Names of files in `Stored` state
    pub fn stored_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .values()
            .filter(|r| r.state == FileState::Stored)
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicas(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("600{}", i + 1)).collect()
    }

    fn stored(index: &mut FileIndex, name: &str, n: usize) {
        index.begin_store(name, 1, replicas(n)).unwrap();
        for replica in replicas(n) {
            index.ack_store(name, &replica).unwrap();
        }
    }

    #[test]
    fn test_store_lifecycle() {
        let mut index = FileIndex::new();
        index.begin_store("a.txt", 100, replicas(3)).unwrap();
        assert!(index.stored_names().is_empty());

        assert_eq!(
            index.ack_store("a.txt", "6001").unwrap(),
            AckProgress::Pending {
                acked: 1,
                required: 3
            }
        );
        assert_eq!(
            index.ack_store("a.txt", "6003").unwrap(),
            AckProgress::Pending {
                acked: 2,
                required: 3
            }
        );
        assert_eq!(
            index.ack_store("a.txt", "6002").unwrap(),
            AckProgress::Complete
        );
        assert_eq!(index.get("a.txt").unwrap().state, FileState::Stored);
        assert_eq!(index.stored_names(), vec!["a.txt"]);

        // extra ack after quorum changes nothing
        assert!(matches!(
            index.ack_store("a.txt", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert_eq!(index.get("a.txt").unwrap().state, FileState::Stored);
    }

    #[test]
    fn test_repeated_store_ack_counts_once() {
        let mut index = FileIndex::new();
        index.begin_store("a.txt", 100, replicas(2)).unwrap();
        index.ack_store("a.txt", "6001").unwrap();
        assert!(matches!(
            index.ack_store("a.txt", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert_eq!(
            index.get("a.txt").unwrap().state,
            FileState::Storing {
                acked: 1,
                required: 2
            }
        );
        assert!(index.stored_names().is_empty());
    }

    #[test]
    fn test_store_ack_from_non_replica() {
        let mut index = FileIndex::new();
        index.begin_store("a.txt", 100, replicas(2)).unwrap();
        assert!(matches!(
            index.ack_store("a.txt", "6009"),
            Err(Error::NonPendingAck(_))
        ));
        assert_eq!(
            index.get("a.txt").unwrap().state,
            FileState::Storing {
                acked: 0,
                required: 2
            }
        );
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let mut index = FileIndex::new();
        index.begin_store("a.txt", 100, replicas(2)).unwrap();
        assert!(matches!(
            index.begin_store("a.txt", 5, replicas(2)),
            Err(Error::FileAlreadyExists(_))
        ));
        assert_eq!(index.get("a.txt").unwrap().size, 100);
    }

    #[test]
    fn test_ack_for_unknown_file() {
        let mut index = FileIndex::new();
        assert!(matches!(
            index.ack_store("ghost", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert!(matches!(
            index.ack_remove("ghost", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_rollback_only_while_storing() {
        let mut index = FileIndex::new();
        index.begin_store("a.txt", 1, replicas(1)).unwrap();
        assert!(index.rollback_store("a.txt"));
        assert!(!index.contains("a.txt"));

        stored(&mut index, "b.txt", 1);
        assert!(!index.rollback_store("b.txt"));
        assert!(index.contains("b.txt"));
    }

    #[test]
    fn test_remove_lifecycle() {
        let mut index = FileIndex::new();
        stored(&mut index, "a.txt", 2);

        let targets = index.begin_remove("a.txt").unwrap();
        assert_eq!(targets, replicas(2));
        assert!(index.stored_names().is_empty());
        assert!(matches!(
            index.begin_remove("a.txt"),
            Err(Error::InvalidState { .. })
        ));

        // store acks from the same replicas do not carry over
        assert_eq!(
            index.ack_remove("a.txt", "6002").unwrap(),
            AckProgress::Pending {
                acked: 1,
                required: 2
            }
        );
        assert!(index.contains("a.txt"));
        assert_eq!(
            index.ack_remove("a.txt", "6001").unwrap(),
            AckProgress::Complete
        );
        assert!(!index.contains("a.txt"));
    }

    #[test]
    fn test_repeated_remove_ack_counts_once() {
        let mut index = FileIndex::new();
        stored(&mut index, "a.txt", 2);
        index.begin_remove("a.txt").unwrap();

        index.ack_remove("a.txt", "6001").unwrap();
        assert!(matches!(
            index.ack_remove("a.txt", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert!(matches!(
            index.ack_remove("a.txt", "6007"),
            Err(Error::NonPendingAck(_))
        ));
        assert_eq!(
            index.get("a.txt").unwrap().state,
            FileState::Removing {
                acked: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_remove_requires_stored() {
        let mut index = FileIndex::new();
        assert!(matches!(
            index.begin_remove("a.txt"),
            Err(Error::FileNotFound(_))
        ));
        index.begin_store("a.txt", 1, replicas(2)).unwrap();
        assert!(matches!(
            index.begin_remove("a.txt"),
            Err(Error::InvalidState { .. })
        ));
        // store acks still apply while the remove was refused
        assert!(index.ack_store("a.txt", "6001").is_ok());
    }

    #[test]
    fn test_store_ack_ignored_while_removing() {
        let mut index = FileIndex::new();
        stored(&mut index, "a.txt", 1);
        index.begin_remove("a.txt").unwrap();
        assert!(matches!(
            index.ack_store("a.txt", "6001"),
            Err(Error::NonPendingAck(_))
        ));
        assert_eq!(
            index.get("a.txt").unwrap().state,
            FileState::Removing {
                acked: 0,
                required: 1
            }
        );
    }
}
