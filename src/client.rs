//! Client for the replistore coordinator
//!
//! Holds one connection to the coordinator and opens a short-lived connection
//! to a worker for every transfer. After a timed-out request the connection
//! may still receive the late reply, so the client should be dropped.

use crate::common::protocol::write_line;
use crate::common::{resolve_worker_addr, validate_name, ClientConfig, Error, Message, Result};
use bytes::Bytes;
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Upper bound on the buffer reserved before a blob starts arriving
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

pub struct Client {
    config: ClientConfig,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let stream = connect(&config, &config.coordinator_addr).await?;
        let (reader, writer) = stream.into_split();
        tracing::debug!("Connected to coordinator {}", config.coordinator_addr);
        Ok(Self {
            config,
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Store a file on every replica the coordinator picks and wait for
    /// STORE_COMPLETE.
    pub async fn store(&mut self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.send(&Message::Store {
            name: name.to_string(),
            size: data.len() as u64,
        })
        .await?;

        let replicas = match self.recv(name).await? {
            Message::StoreTo(replicas) => replicas,
            other => return Err(Error::from_reply(name, other)),
        };

        for replica in &replicas {
            let addr = resolve_worker_addr(replica, &self.config.coordinator_addr);
            // a failed push leaves the store short of quorum; the coordinator
            // rolls it back at its deadline
            if let Err(e) = self.push(&addr, name, data).await {
                tracing::warn!("{}: push to {} failed: {}", name, addr, e);
            }
        }

        match self.recv(name).await? {
            Message::StoreComplete => {
                tracing::info!("{}: stored on {} workers", name, replicas.len());
                Ok(())
            }
            other => Err(Error::from_reply(name, other)),
        }
    }

    /// Fetch a file, asking the coordinator for another replica whenever a
    /// worker fails.
    pub async fn load(&mut self, name: &str) -> Result<Bytes> {
        validate_name(name)?;
        self.send(&Message::Load(name.to_string())).await?;

        loop {
            match self.recv(name).await? {
                Message::LoadFrom { address, size } => {
                    let addr = resolve_worker_addr(&address, &self.config.coordinator_addr);
                    match self.fetch(&addr, name, size).await {
                        Ok(data) => return Ok(data),
                        Err(e) => {
                            tracing::warn!("{}: load from {} failed: {}", name, addr, e);
                            self.send(&Message::Reload(name.to_string())).await?;
                        }
                    }
                }
                other => return Err(Error::from_reply(name, other)),
            }
        }
    }

    pub async fn remove(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.send(&Message::Remove(name.to_string())).await?;
        match self.recv(name).await? {
            Message::RemoveComplete => Ok(()),
            other => Err(Error::from_reply(name, other)),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        self.send(&Message::List(Vec::new())).await?;
        match self.recv("LIST").await? {
            Message::List(names) => Ok(names),
            other => Err(Error::from_reply("LIST", other)),
        }
    }

    async fn send(&mut self, msg: &Message) -> Result<()> {
        write_line(&mut self.writer, &msg.to_string()).await?;
        Ok(())
    }

    async fn recv(&mut self, name: &str) -> Result<Message> {
        let line = tokio::time::timeout(self.config.timeout(), self.lines.next_line())
            .await
            .map_err(|_| Error::AckTimeout(name.to_string()))??
            .ok_or_else(|| Error::ConnectionFailed("coordinator closed the connection".into()))?;
        Message::parse(&line)
    }

    /// STORE on one worker: request, wait for ACK, send the bytes.
    async fn push(&self, addr: &str, name: &str, data: &[u8]) -> Result<()> {
        let stream = connect(&self.config, addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        within(&self.config, addr, async {
            let request = Message::Store {
                name: name.to_string(),
                size: data.len() as u64,
            };
            write_line(&mut writer, &request.to_string()).await?;

            let mut line = String::new();
            reader.read_line(&mut line).await?;
            match Message::parse(line.trim_end())? {
                Message::Ack => {}
                other => return Err(Error::UnexpectedReply(other.to_string())),
            }

            writer.write_all(data).await?;
            writer.shutdown().await?;
            Ok(())
        })
        .await
    }

    /// LOAD_DATA from one worker. A worker without the blob closes the
    /// connection, which surfaces as an early EOF.
    async fn fetch(&self, addr: &str, name: &str, size: u64) -> Result<Bytes> {
        let mut stream = connect(&self.config, addr).await?;

        within(&self.config, addr, async {
            write_line(&mut stream, &Message::LoadData(name.to_string()).to_string()).await?;
            let mut data = Vec::with_capacity(size.min(PREALLOC_LIMIT) as usize);
            let mut limited = (&mut stream).take(size);
            let received = limited.read_to_end(&mut data).await?;
            if (received as u64) < size {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{}: got {} of {} bytes", name, received, size),
                )));
            }
            Ok(Bytes::from(data))
        })
        .await
    }
}

async fn connect(config: &ClientConfig, addr: &str) -> Result<TcpStream> {
    within(config, addr, async {
        TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", addr, e)))
    })
    .await
}

async fn within<T>(
    config: &ClientConfig,
    addr: &str,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(config.timeout(), op)
        .await
        .map_err(|_| Error::TransferTimeout(format!("{}: no progress", addr)))?
}
