//! Coordinator service: a single task owning the [`Engine`]
//!
//! Sessions talk to the engine through a cloneable [`CoordinatorHandle`].
//! Commands are applied one at a time in arrival order, so acknowledgements
//! for a file are counted in the order they were received and no table is
//! ever shared between tasks.

use crate::common::{Error, Outbox, Result};
use crate::coordinator::engine::{Completion, Engine, StorePlan};
use crate::coordinator::index::{AckProgress, FileState};
use crate::coordinator::load::{LoadKind, LoadOffer};
use tokio::sync::{mpsc, oneshot};

const COMMAND_QUEUE: usize = 1024;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Join {
        address: String,
        outbox: Outbox,
    },
    WorkerCount(Reply<usize>),
    FileState {
        name: String,
        reply: Reply<Option<FileState>>,
    },
    List(Reply<Result<Vec<String>>>),
    Store {
        name: String,
        size: u64,
        reply: Reply<Result<StorePlan>>,
    },
    StoreAck {
        name: String,
        from: String,
        reply: Reply<Result<AckProgress>>,
    },
    ExpireStore {
        name: String,
        reply: Reply<bool>,
    },
    Load {
        name: String,
        kind: LoadKind,
        reply: Reply<Result<LoadOffer>>,
    },
    Remove {
        name: String,
        reply: Reply<Result<Completion>>,
    },
    RemoveAck {
        name: String,
        from: String,
        reply: Reply<Result<AckProgress>>,
    },
    ExpireRemove {
        name: String,
        reply: Reply<bool>,
    },
}

/// Start the engine task and return a handle to it.
pub fn spawn(engine: Engine) -> CoordinatorHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    tokio::spawn(run(engine, rx));
    CoordinatorHandle { tx }
}

async fn run(mut engine: Engine, mut rx: mpsc::Receiver<Command>) {
    tracing::debug!(
        "Engine running (replication factor {})",
        engine.replication_factor()
    );
    while let Some(command) = rx.recv().await {
        apply(&mut engine, command);
    }
    tracing::debug!("Engine stopped: all handles dropped");
}

// A dropped reply receiver means the requesting session went away; the state
// change itself has already been applied.
fn apply(engine: &mut Engine, command: Command) {
    match command {
        Command::Join { address, outbox } => engine.join(address, outbox),
        Command::WorkerCount(reply) => {
            let _ = reply.send(engine.worker_count());
        }
        Command::FileState { name, reply } => {
            let _ = reply.send(engine.file_state(&name));
        }
        Command::List(reply) => {
            let _ = reply.send(engine.list());
        }
        Command::Store { name, size, reply } => {
            let _ = reply.send(engine.begin_store(&name, size));
        }
        Command::StoreAck { name, from, reply } => {
            let _ = reply.send(engine.store_ack(&name, &from));
        }
        Command::ExpireStore { name, reply } => {
            let _ = reply.send(engine.expire_store(&name));
        }
        Command::Load { name, kind, reply } => {
            let _ = reply.send(engine.load(&name, kind));
        }
        Command::Remove { name, reply } => {
            let _ = reply.send(engine.begin_remove(&name));
        }
        Command::RemoveAck { name, from, reply } => {
            let _ = reply.send(engine.remove_ack(&name, &from));
        }
        Command::ExpireRemove { name, reply } => {
            let _ = reply.send(engine.expire_remove(&name));
        }
    }
}

/// Cheap, cloneable access to the coordinator engine
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::Internal("coordinator engine stopped".into()))?;
        rx.await
            .map_err(|_| Error::Internal("coordinator engine dropped a request".into()))
    }

    pub async fn join(&self, address: String, outbox: Outbox) -> Result<()> {
        self.tx
            .send(Command::Join { address, outbox })
            .await
            .map_err(|_| Error::Internal("coordinator engine stopped".into()))
    }

    pub async fn worker_count(&self) -> Result<usize> {
        self.call(Command::WorkerCount).await
    }

    pub async fn file_state(&self, name: &str) -> Result<Option<FileState>> {
        let name = name.to_string();
        self.call(|reply| Command::FileState { name, reply }).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.call(Command::List).await?
    }

    pub async fn store(&self, name: &str, size: u64) -> Result<StorePlan> {
        let name = name.to_string();
        self.call(|reply| Command::Store { name, size, reply })
            .await?
    }

    /// Count a STORE_ACK sent by the worker that joined as `from`.
    pub async fn store_ack(&self, name: &str, from: &str) -> Result<AckProgress> {
        let (name, from) = (name.to_string(), from.to_string());
        self.call(|reply| Command::StoreAck { name, from, reply })
            .await?
    }

    pub async fn expire_store(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.call(|reply| Command::ExpireStore { name, reply }).await
    }

    pub async fn load(&self, name: &str, kind: LoadKind) -> Result<LoadOffer> {
        let name = name.to_string();
        self.call(|reply| Command::Load { name, kind, reply })
            .await?
    }

    pub async fn remove(&self, name: &str) -> Result<Completion> {
        let name = name.to_string();
        self.call(|reply| Command::Remove { name, reply }).await?
    }

    pub async fn remove_ack(&self, name: &str, from: &str) -> Result<AckProgress> {
        let (name, from) = (name.to_string(), from.to_string());
        self.call(|reply| Command::RemoveAck { name, from, reply })
            .await?
    }

    pub async fn expire_remove(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.call(|reply| Command::ExpireRemove { name, reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let handle = spawn(Engine::new(2));
        let (tx, _rx) = mpsc::unbounded_channel();
        handle.join("6001".into(), tx.clone()).await.unwrap();
        handle.join("6002".into(), tx).await.unwrap();
        assert_eq!(handle.worker_count().await.unwrap(), 2);

        let plan = handle.store("a.txt", 5).await.unwrap();
        assert_eq!(plan.replicas.len(), 2);
        handle.store_ack("a.txt", "6001").await.unwrap();
        assert_eq!(
            handle.store_ack("a.txt", "6002").await.unwrap(),
            AckProgress::Complete
        );
        plan.completion.await.unwrap();

        assert_eq!(handle.list().await.unwrap(), vec!["a.txt"]);
        assert_eq!(
            handle.file_state("a.txt").await.unwrap(),
            Some(FileState::Stored)
        );
    }

    #[tokio::test]
    async fn test_engine_errors_pass_through() {
        let handle = spawn(Engine::new(3));
        assert!(matches!(
            handle.list().await,
            Err(Error::InsufficientWorkers { .. })
        ));
        assert!(matches!(
            handle.load("nope", LoadKind::Fresh).await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            handle.store_ack("nope", "6001").await,
            Err(Error::NonPendingAck(_))
        ));
    }
}
