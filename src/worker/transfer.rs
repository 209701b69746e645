//! Transfer handling on a storage worker
//!
//! Client connections carry `STORE name size` (followed by exactly `size` raw
//! bytes), `LOAD_DATA name` and `REMOVE name`. The coordinator connection
//! carries remove orders. Every client read and write runs under the
//! configured I/O deadline; a timed-out store is dropped without telling the
//! coordinator, whose own STORE deadline reclaims the record.

use crate::common::protocol::write_line;
use crate::common::{send, Error, Message, Outbox, Result};
use crate::worker::blob::BlobStore;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on the buffer reserved up front for an incoming blob; larger
/// blobs grow the buffer as bytes arrive.
const PREALLOC_LIMIT: u64 = 8 * 1024 * 1024;

/// Shared by every connection of one worker
pub struct TransferContext {
    pub store: Arc<dyn BlobStore>,
    /// Connection to the coordinator, for STORE_ACK and remove replies
    pub coordinator: Outbox,
    pub io_timeout: Duration,
}

impl TransferContext {
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BlobStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| Error::Internal(format!("blob task failed: {}", e)))?
    }
}

/// Serve one client connection until it closes, a transfer fails, or a
/// requested blob is missing.
pub async fn handle_client<S>(stream: S, peer: String, ctx: Arc<TransferContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("{}: read failed: {}", peer, e);
                break;
            }
        }

        let msg = match Message::parse(line.trim_end()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("{}: {}", peer, e);
                continue;
            }
        };

        let outcome = match msg {
            Message::Store { name, size } => {
                receive_blob(&mut reader, &mut writer, name, size, &ctx).await
            }
            Message::LoadData(name) => match send_blob(&mut writer, &name, &ctx).await {
                Ok(true) => Ok(()),
                // closing without data tells the client to try another replica
                Ok(false) => break,
                Err(e) => Err(e),
            },
            Message::Remove(name) => {
                let reply = remove_blob(&ctx, name).await;
                match reply {
                    Some(reply) => write_line(&mut writer, &reply.to_string())
                        .await
                        .map_err(Error::from),
                    None => Ok(()),
                }
            }
            other => {
                tracing::warn!("{}: unexpected message {}", peer, other);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            match e {
                Error::TransferTimeout(_) => tracing::warn!("{}: {}", peer, e),
                _ => tracing::error!("{}: {}", peer, e),
            }
            break;
        }
    }

    tracing::debug!("{}: client disconnected", peer);
}

/// STORE: acknowledge, read exactly `size` bytes, persist, report upstream.
async fn receive_blob<R, W>(
    reader: &mut R,
    writer: &mut W,
    name: String,
    size: u64,
    ctx: &TransferContext,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!("{}: store request, {} bytes", name, size);
    write_line(writer, &Message::Ack.to_string()).await?;

    let mut data = Vec::with_capacity(size.min(PREALLOC_LIMIT) as usize);
    let mut limited = (&mut *reader).take(size);
    let received = tokio::time::timeout(ctx.io_timeout, limited.read_to_end(&mut data))
        .await
        .map_err(|_| Error::TransferTimeout(format!("{}: {} bytes not received in time", name, size)))??;
    if (received as u64) < size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{}: connection closed after {} of {} bytes", name, received, size),
        )));
    }

    let data = Bytes::from(data);
    let key = name.clone();
    ctx.blocking(move |store| store.write(&key, &data)).await?;

    if !send(&ctx.coordinator, &Message::StoreAck(name.clone())) {
        tracing::error!("{}: stored but coordinator link is down", name);
    } else {
        tracing::info!("{}: stored, coordinator notified", name);
    }
    Ok(())
}

/// LOAD_DATA: stream the blob. Returns false if it is absent.
async fn send_blob<W>(writer: &mut W, name: &str, ctx: &TransferContext) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let key = name.to_string();
    let data = match ctx.blocking(move |store| store.read(&key)).await? {
        Some(data) => data,
        None => {
            tracing::warn!("{}: load requested but not stored here", name);
            return Ok(false);
        }
    };

    let write = async {
        writer.write_all(&data).await?;
        writer.flush().await
    };
    tokio::time::timeout(ctx.io_timeout, write)
        .await
        .map_err(|_| Error::TransferTimeout(format!("{}: client stopped reading", name)))??;

    tracing::info!("{}: sent {} bytes", name, data.len());
    Ok(true)
}

/// Delete a blob and build the reply for whoever asked. A storage failure is
/// logged and left unanswered, so the coordinator's remove deadline applies.
async fn remove_blob(ctx: &TransferContext, name: String) -> Option<Message> {
    let key = name.clone();
    match ctx.blocking(move |store| store.delete(&key)).await {
        Ok(true) => {
            tracing::info!("{}: removed", name);
            Some(Message::RemoveAck(name))
        }
        Ok(false) => {
            tracing::warn!("{}: remove requested but not stored here", name);
            Some(Message::ErrorFileDoesNotExist(Some(name)))
        }
        Err(e) => {
            tracing::error!("{}: remove failed: {}", name, e);
            None
        }
    }
}

/// Serve remove orders from the coordinator until the link closes.
pub async fn handle_coordinator<R>(reader: R, ctx: Arc<TransferContext>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("coordinator: read failed: {}", e);
                break;
            }
        };

        match Message::parse(&line) {
            Ok(Message::Remove(name)) => {
                if let Some(reply) = remove_blob(&ctx, name).await {
                    if !send(&ctx.coordinator, &reply) {
                        tracing::error!("coordinator: link is down, dropped {}", reply);
                    }
                }
            }
            Ok(other) => tracing::warn!("coordinator: unexpected message {}", other),
            Err(e) => tracing::warn!("coordinator: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::blob::MemBlobStore;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    fn context(
        io_timeout: Duration,
    ) -> (
        Arc<TransferContext>,
        Arc<MemBlobStore>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let store = Arc::new(MemBlobStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(TransferContext {
            store: store.clone(),
            coordinator: tx,
            io_timeout,
        });
        (ctx, store, rx)
    }

    /// A disk that refuses every operation
    struct BrokenStore;

    impl BlobStore for BrokenStore {
        fn exists(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }

        fn write(&self, name: &str, _data: &[u8]) -> Result<()> {
            Err(Error::storage(name, std::io::Error::other("disk gone")))
        }

        fn read(&self, name: &str) -> Result<Option<Bytes>> {
            Err(Error::storage(name, std::io::Error::other("disk gone")))
        }

        fn delete(&self, name: &str) -> Result<bool> {
            Err(Error::storage(name, std::io::Error::other("disk gone")))
        }
    }

    fn serve(ctx: &Arc<TransferContext>) -> BufReader<DuplexStream> {
        let (client, worker) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handle_client(worker, "client".into(), ctx.clone()));
        BufReader::new(client)
    }

    async fn read_line(conn: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        conn.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let (ctx, store, mut upstream) = context(Duration::from_secs(5));
        let mut conn = serve(&ctx);

        conn.get_mut().write_all(b"STORE a.txt 5\n").await.unwrap();
        assert_eq!(read_line(&mut conn).await, "ACK");
        conn.get_mut().write_all(b"hello").await.unwrap();

        assert_eq!(upstream.recv().await.unwrap(), "STORE_ACK a.txt");
        assert_eq!(store.read("a.txt").unwrap().unwrap().as_ref(), b"hello");

        conn.get_mut().write_all(b"LOAD_DATA a.txt\n").await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_store_bytes_in_same_packet_as_request() {
        let (ctx, store, mut upstream) = context(Duration::from_secs(5));
        let mut conn = serve(&ctx);

        conn.get_mut()
            .write_all(b"STORE b.bin 3\nxyz")
            .await
            .unwrap();
        assert_eq!(read_line(&mut conn).await, "ACK");
        assert_eq!(upstream.recv().await.unwrap(), "STORE_ACK b.bin");
        assert_eq!(store.read("b.bin").unwrap().unwrap().as_ref(), b"xyz");
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_does_not_ack() {
        let (ctx, store, mut upstream) = context(Duration::from_millis(200));
        let mut conn = serve(&ctx);

        conn.get_mut().write_all(b"STORE a.txt 10\n").await.unwrap();
        assert_eq!(read_line(&mut conn).await, "ACK");
        conn.get_mut().write_all(b"abc").await.unwrap();

        // the worker gives up and closes the connection
        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        assert!(!store.exists("a.txt").unwrap());
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_closes_connection() {
        let (ctx, _store, _upstream) = context(Duration::from_secs(5));
        let mut conn = serve(&ctx);

        conn.get_mut()
            .write_all(b"LOAD_DATA nope.txt\n")
            .await
            .unwrap();
        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_client_remove_replies_on_client_connection() {
        let (ctx, store, mut upstream) = context(Duration::from_secs(5));
        store.write("a.txt", b"x").unwrap();
        let mut conn = serve(&ctx);

        conn.get_mut().write_all(b"REMOVE a.txt\n").await.unwrap();
        assert_eq!(read_line(&mut conn).await, "REMOVE_ACK a.txt");
        conn.get_mut().write_all(b"REMOVE a.txt\n").await.unwrap();
        assert_eq!(read_line(&mut conn).await, "ERROR_FILE_DOES_NOT_EXIST a.txt");
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_coordinator_remove_orders() {
        let (ctx, store, mut upstream) = context(Duration::from_secs(5));
        store.write("a.txt", b"x").unwrap();

        let (mut coordinator, worker_side) = tokio::io::duplex(1024);
        tokio::spawn(handle_coordinator(worker_side, ctx.clone()));

        coordinator
            .write_all(b"REMOVE a.txt\nGARBAGE\nREMOVE a.txt\n")
            .await
            .unwrap();
        assert_eq!(upstream.recv().await.unwrap(), "REMOVE_ACK a.txt");
        assert_eq!(
            upstream.recv().await.unwrap(),
            "ERROR_FILE_DOES_NOT_EXIST a.txt"
        );
        assert!(!store.exists("a.txt").unwrap());
    }

    #[tokio::test]
    async fn test_coordinator_link_down_keeps_serving() {
        let (ctx, store, upstream) = context(Duration::from_secs(5));
        store.write("a.txt", b"x").unwrap();
        store.write("b.txt", b"y").unwrap();
        drop(upstream);

        let (mut coordinator, worker_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(handle_coordinator(worker_side, ctx.clone()));
        coordinator
            .write_all(b"REMOVE a.txt\nREMOVE b.txt\n")
            .await
            .unwrap();
        drop(coordinator);

        task.await.unwrap();
        assert!(!store.exists("a.txt").unwrap());
        assert!(!store.exists("b.txt").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_load_reader_times_out() {
        let (ctx, store, _upstream) = context(Duration::from_millis(200));
        store.write("big.bin", &[7u8; 4096]).unwrap();

        // the pipe holds far less than the blob and the client never reads
        let (mut client, worker) = tokio::io::duplex(64);
        let task = tokio::spawn(handle_client(worker, "client".into(), ctx.clone()));
        client.write_all(b"LOAD_DATA big.bin\n").await.unwrap();

        task.await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.len() < 4096);
    }

    #[tokio::test]
    async fn test_failed_remove_sends_no_reply() {
        let (tx, mut upstream) = mpsc::unbounded_channel();
        let ctx = Arc::new(TransferContext {
            store: Arc::new(BrokenStore),
            coordinator: tx,
            io_timeout: Duration::from_secs(5),
        });

        // client path: nothing is written for the REMOVE, then the failed
        // LOAD_DATA closes the connection
        let mut conn = serve(&ctx);
        conn.get_mut()
            .write_all(b"REMOVE a.txt\nLOAD_DATA a.txt\n")
            .await
            .unwrap();
        let mut rest = Vec::new();
        conn.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        // coordinator path: the order goes unanswered
        let (mut coordinator, worker_side) = tokio::io::duplex(1024);
        let task = tokio::spawn(handle_coordinator(worker_side, ctx.clone()));
        coordinator.write_all(b"REMOVE a.txt\n").await.unwrap();
        drop(coordinator);
        task.await.unwrap();
        assert!(upstream.try_recv().is_err());
    }
}
