//! Per-connection protocol handler
//!
//! Workers and clients share one listener; the first line a worker sends is
//! JOIN, after which its connection carries STORE_ACK/REMOVE_ACK upstream and
//! remove orders downstream. A STORE or REMOVE suspends only the session that
//! issued it while it waits for quorum.

use crate::common::{send, spawn_writer, Error, Message, Outbox, Result};
use crate::coordinator::load::LoadKind;
use crate::coordinator::service::CoordinatorHandle;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;

/// Serve one accepted TCP connection until the peer disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    handle: CoordinatorHandle,
    ack_timeout: Duration,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let (reader, writer) = stream.into_split();
    run_session(reader, writer, peer, handle, ack_timeout).await;
}

/// Read and dispatch protocol lines until EOF.
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    peer: String,
    handle: CoordinatorHandle,
    ack_timeout: Duration,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session {
        outbox: spawn_writer(writer, peer.clone()),
        peer,
        worker: None,
        handle,
        ack_timeout,
    };
    tracing::debug!("{}: connected", session.peer);

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("{}: read failed: {}", session.peer, e);
                break;
            }
        };
        tracing::debug!("{}: received {}", session.peer, line);

        let msg = match Message::parse(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("{}: {}", session.peer, e);
                continue;
            }
        };

        if let Err(e) = session.dispatch(msg).await {
            tracing::error!("{}: {}", session.peer, e);
            break;
        }
    }

    tracing::debug!("{}: disconnected", session.peer);
}

struct Session {
    peer: String,
    /// Address announced by JOIN; ACKs are counted for this worker only.
    worker: Option<String>,
    outbox: Outbox,
    handle: CoordinatorHandle,
    ack_timeout: Duration,
}

impl Session {
    fn reply(&self, msg: Message) {
        if !send(&self.outbox, &msg) {
            tracing::warn!("{}: connection closed, dropped {}", self.peer, msg);
        }
    }

    /// Report a refused request to the client. Only a stopped engine is
    /// returned to the caller.
    fn reject(&self, err: Error) -> Result<()> {
        if let Error::Internal(_) = err {
            return Err(err);
        }
        tracing::warn!("{}: {}", self.peer, err);
        if let Some(reply) = err.to_reply() {
            self.reply(reply);
        }
        Ok(())
    }

    /// Address of the worker on this connection, or a refusal for an ACK
    /// that arrived before JOIN.
    fn joined_as(&self, name: &str) -> Result<&str> {
        self.worker.as_deref().ok_or_else(|| {
            Error::NonPendingAck(format!("{} from a connection that never joined", name))
        })
    }

    async fn dispatch(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::Join(address) => {
                self.worker = Some(address.clone());
                self.handle.join(address, self.outbox.clone()).await?;
            }
            Message::List(_) => match self.handle.list().await {
                Ok(names) => self.reply(Message::List(names)),
                Err(e) => return self.reject(e),
            },
            Message::Store { name, size } => return self.store(name, size).await,
            Message::StoreAck(name) => {
                let acked = match self.joined_as(&name) {
                    Ok(from) => self.handle.store_ack(&name, from).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = acked {
                    return self.reject(e);
                }
            }
            Message::Load(name) => return self.load(name, LoadKind::Fresh).await,
            Message::Reload(name) => return self.load(name, LoadKind::Retry).await,
            Message::Remove(name) => return self.remove(name).await,
            Message::RemoveAck(name) => {
                let acked = match self.joined_as(&name) {
                    Ok(from) => self.handle.remove_ack(&name, from).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = acked {
                    return self.reject(e);
                }
            }
            Message::ErrorFileDoesNotExist(Some(name)) => {
                tracing::warn!(
                    "{}: worker has no copy of {}, not counted toward removal",
                    self.peer,
                    name
                );
            }
            other => {
                tracing::warn!("{}: unexpected message {}", self.peer, other);
            }
        }
        Ok(())
    }

    async fn store(&self, name: String, size: u64) -> Result<()> {
        let plan = match self.handle.store(&name, size).await {
            Ok(plan) => plan,
            Err(e) => return self.reject(e),
        };
        self.reply(Message::StoreTo(plan.replicas));

        match tokio::time::timeout(self.ack_timeout, plan.completion).await {
            Ok(Ok(())) => self.reply(Message::StoreComplete),
            Ok(Err(_)) => tracing::warn!("{}: store of {} abandoned", self.peer, name),
            Err(_) => {
                // quorum may have landed between the deadline and the rollback
                if !self.handle.expire_store(&name).await? {
                    self.reply(Message::StoreComplete);
                }
            }
        }
        Ok(())
    }

    async fn load(&self, name: String, kind: LoadKind) -> Result<()> {
        match self.handle.load(&name, kind).await {
            Ok(offer) => {
                tracing::info!("{}: {} offered from {}", self.peer, name, offer.address);
                self.reply(Message::LoadFrom {
                    address: offer.address,
                    size: offer.size,
                });
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    async fn remove(&self, name: String) -> Result<()> {
        let completion = match self.handle.remove(&name).await {
            Ok(completion) => completion,
            Err(e) => return self.reject(e),
        };

        match tokio::time::timeout(self.ack_timeout, completion).await {
            Ok(Ok(())) => self.reply(Message::RemoveComplete),
            Ok(Err(_)) => tracing::warn!("{}: remove of {} abandoned", self.peer, name),
            Err(_) => {
                if !self.handle.expire_remove(&name).await? {
                    self.reply(Message::RemoveComplete);
                }
            }
        }
        Ok(())
    }
}
