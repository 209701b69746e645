//! Storage worker server

use crate::common::{send, spawn_writer, Error, Message, Result, WorkerConfig};
use crate::worker::blob::BlobStore;
use crate::worker::transfer::{handle_client, handle_coordinator, TransferContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct StorageWorker {
    config: WorkerConfig,
    listener: TcpListener,
    store: Arc<dyn BlobStore>,
}

impl StorageWorker {
    /// Bind the client listener. The worker joins the coordinator when
    /// `serve` runs.
    pub async fn bind(config: WorkerConfig, store: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self {
            config,
            listener,
            store,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Address announced in JOIN: the configured one, or the bound port.
    pub fn advertised_addr(&self) -> Result<String> {
        match &self.config.advertise_addr {
            Some(addr) => Ok(addr.clone()),
            None => Ok(self.local_addr()?.port().to_string()),
        }
    }

    /// Join the coordinator and serve clients until the coordinator link
    /// closes.
    pub async fn serve(self) -> Result<()> {
        let advertised = self.advertised_addr()?;
        tracing::info!("Starting storage worker");
        tracing::info!("  Listening: {}", self.local_addr()?);
        tracing::info!("  Advertised as: {}", advertised);
        tracing::info!("  Coordinator: {}", self.config.coordinator_addr);
        tracing::info!("  I/O timeout: {:?}", self.config.io_timeout());

        let stream = TcpStream::connect(&self.config.coordinator_addr)
            .await
            .map_err(|e| {
                Error::ConnectionFailed(format!("{}: {}", self.config.coordinator_addr, e))
            })?;
        let (reader, writer) = stream.into_split();
        let coordinator = spawn_writer(writer, "coordinator".into());
        send(&coordinator, &Message::Join(advertised));

        let ctx = Arc::new(TransferContext {
            store: self.store.clone(),
            coordinator,
            io_timeout: self.config.io_timeout(),
        });
        let mut upstream = tokio::spawn(handle_coordinator(reader, ctx.clone()));
        tracing::info!("✓ Worker joined, ready");

        loop {
            tokio::select! {
                _ = &mut upstream => {
                    return Err(Error::ConnectionFailed(
                        "coordinator closed the connection".into(),
                    ));
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_client(stream, peer.to_string(), ctx.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::blob::MemBlobStore;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn config(coordinator_addr: String) -> WorkerConfig {
        WorkerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            coordinator_addr,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_joins_with_bound_port() {
        let coordinator = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = coordinator.local_addr().unwrap().to_string();

        let worker = StorageWorker::bind(config(addr), Arc::new(MemBlobStore::new()))
            .await
            .unwrap();
        let port = worker.local_addr().unwrap().port();
        let task = tokio::spawn(worker.serve());

        let (stream, _) = coordinator.accept().await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            format!("JOIN {}", port)
        );

        // dropping the coordinator side ends the worker
        drop(lines);
        assert!(matches!(
            task.await.unwrap(),
            Err(Error::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_advertise_override() {
        let mut cfg = config("127.0.0.1:1".into());
        cfg.advertise_addr = Some("storage-1:7000".into());
        let worker = StorageWorker::bind(cfg, Arc::new(MemBlobStore::new()))
            .await
            .unwrap();
        assert_eq!(worker.advertised_addr().unwrap(), "storage-1:7000");
    }

    #[tokio::test]
    async fn test_unreachable_coordinator() {
        // bind and drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let worker = StorageWorker::bind(config(addr), Arc::new(MemBlobStore::new()))
            .await
            .unwrap();
        assert!(matches!(
            worker.serve().await,
            Err(Error::ConnectionFailed(_))
        ));
    }
}
