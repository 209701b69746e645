//! Error types for replistore

use crate::common::protocol::Message;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage I/O failure on {name}: {source}")]
    StorageIo {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // === Placement Errors ===
    #[error("Insufficient workers: need {needed}, have {available}")]
    InsufficientWorkers { needed: usize, available: usize },

    /// Client-side view of a placement refusal; counts are not on the wire.
    #[error("Not enough workers to place {0}")]
    NotEnoughWorkers(String),

    // === File Index Errors ===
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File {name} is {state}, operation not allowed")]
    InvalidState { name: String, state: String },

    #[error("All replicas of {0} have been tried")]
    LoadExhausted(String),

    // === Quorum Errors ===
    #[error("Timed out waiting for acknowledgements of {0}")]
    AckTimeout(String),

    #[error("Acknowledgement for non-pending file: {0}")]
    NonPendingAck(String),

    // === Transfer Errors ===
    #[error("Transfer timeout: {0}")]
    TransferTimeout(String),

    // === Protocol Errors ===
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire reply sent to the requesting client for this error, if any.
    ///
    /// Files that exist but are mid-store or mid-remove are reported as absent,
    /// since they are not visible to LIST either.
    pub fn to_reply(&self) -> Option<Message> {
        match self {
            Error::InsufficientWorkers { .. } | Error::NotEnoughWorkers(_) => {
                Some(Message::ErrorNotEnoughWorkers)
            }
            Error::FileAlreadyExists(_) => Some(Message::ErrorFileAlreadyExists),
            Error::FileNotFound(_) | Error::InvalidState { .. } => {
                Some(Message::ErrorFileDoesNotExist(None))
            }
            Error::LoadExhausted(_) => Some(Message::ErrorLoad),
            _ => None,
        }
    }

    /// Client-side error for a reply that was not the one expected for `name`.
    pub fn from_reply(name: &str, reply: Message) -> Self {
        match reply {
            Message::ErrorNotEnoughWorkers => Error::NotEnoughWorkers(name.to_string()),
            Message::ErrorFileAlreadyExists => Error::FileAlreadyExists(name.to_string()),
            Message::ErrorFileDoesNotExist(_) => Error::FileNotFound(name.to_string()),
            Message::ErrorLoad => Error::LoadExhausted(name.to_string()),
            other => Error::UnexpectedReply(other.to_string()),
        }
    }

    pub(crate) fn storage(name: &str, source: std::io::Error) -> Self {
        Error::StorageIo {
            name: name.to_string(),
            source,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_tokens() {
        let err = Error::InsufficientWorkers {
            needed: 3,
            available: 2,
        };
        assert_eq!(err.to_reply(), Some(Message::ErrorNotEnoughWorkers));
        assert_eq!(
            Error::FileAlreadyExists("a".into()).to_reply(),
            Some(Message::ErrorFileAlreadyExists)
        );
        assert_eq!(
            Error::InvalidState {
                name: "a".into(),
                state: "storing".into()
            }
            .to_reply(),
            Some(Message::ErrorFileDoesNotExist(None))
        );
        assert_eq!(
            Error::LoadExhausted("a".into()).to_reply(),
            Some(Message::ErrorLoad)
        );
        assert_eq!(Error::NonPendingAck("a".into()).to_reply(), None);
    }

    #[test]
    fn test_from_reply() {
        assert!(matches!(
            Error::from_reply("a", Message::ErrorNotEnoughWorkers),
            Error::NotEnoughWorkers(name) if name == "a"
        ));
        assert!(matches!(
            Error::from_reply("a", Message::ErrorFileDoesNotExist(None)),
            Error::FileNotFound(_)
        ));
        assert!(matches!(
            Error::from_reply("a", Message::ErrorLoad),
            Error::LoadExhausted(_)
        ));
        assert!(matches!(
            Error::from_reply("a", Message::RemoveComplete),
            Error::UnexpectedReply(line) if line == "REMOVE_COMPLETE"
        ));
    }
}
