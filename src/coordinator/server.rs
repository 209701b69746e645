//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::engine::Engine;
use crate::coordinator::service::{self, CoordinatorHandle};
use crate::coordinator::session;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener,
    handle: CoordinatorHandle,
}

impl Coordinator {
    /// Bind the listener and start the engine. Workers and clients may
    /// connect as soon as `serve` runs.
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr).await?;
        let handle = service::spawn(Engine::new(config.replication_factor));
        Ok(Self {
            config,
            listener,
            handle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  Listening: {}", self.local_addr()?);
        tracing::info!("  Replication factor: {}", self.config.replication_factor);
        tracing::info!("  ACK timeout: {:?}", self.config.ack_timeout());

        let ack_timeout = self.config.ack_timeout();
        tracing::info!("✓ Coordinator ready");

        loop {
            match self.listener.accept().await {
                Ok((stream, _peer)) => {
                    tokio::spawn(session::handle_connection(
                        stream,
                        self.handle.clone(),
                        ack_timeout,
                    ));
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}
