//! Line protocol shared by coordinator, storage workers and clients
//!
//! Every message is one line of space-separated ASCII tokens terminated by
//! `\n`. Raw file bytes follow `ACK` (store) or `LOAD_DATA` (load) on
//! client ↔ worker connections and are not framed here.

use crate::common::{Error, Result};
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

pub const JOIN: &str = "JOIN";
pub const STORE: &str = "STORE";
pub const STORE_TO: &str = "STORE_TO";
pub const STORE_ACK: &str = "STORE_ACK";
pub const STORE_COMPLETE: &str = "STORE_COMPLETE";
pub const LOAD: &str = "LOAD";
pub const RELOAD: &str = "RELOAD";
pub const LOAD_FROM: &str = "LOAD_FROM";
pub const LOAD_DATA: &str = "LOAD_DATA";
pub const REMOVE: &str = "REMOVE";
pub const REMOVE_ACK: &str = "REMOVE_ACK";
pub const REMOVE_COMPLETE: &str = "REMOVE_COMPLETE";
pub const LIST: &str = "LIST";
pub const ACK: &str = "ACK";
pub const ERROR_NOT_ENOUGH_WORKERS: &str = "ERROR_NOT_ENOUGH_WORKERS";
pub const ERROR_FILE_ALREADY_EXISTS: &str = "ERROR_FILE_ALREADY_EXISTS";
pub const ERROR_FILE_DOES_NOT_EXIST: &str = "ERROR_FILE_DOES_NOT_EXIST";
pub const ERROR_LOAD: &str = "ERROR_LOAD";

/// A decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Worker → coordinator: register under the advertised address.
    Join(String),
    /// Client → coordinator or client → worker.
    Store { name: String, size: u64 },
    StoreTo(Vec<String>),
    StoreAck(String),
    StoreComplete,
    Load(String),
    Reload(String),
    LoadFrom { address: String, size: u64 },
    /// Client → worker: stream the blob back.
    LoadData(String),
    /// Client → coordinator, coordinator → worker, or client → worker.
    Remove(String),
    RemoveAck(String),
    RemoveComplete,
    /// Bare `LIST` is the request; the reply carries the stored names.
    List(Vec<String>),
    /// Worker → client: ready to receive file bytes.
    Ack,
    ErrorNotEnoughWorkers,
    ErrorFileAlreadyExists,
    /// Workers name the missing file; the coordinator replies without one.
    ErrorFileDoesNotExist(Option<String>),
    ErrorLoad,
}

impl Message {
    /// Decode one line (without its terminator).
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let token = parts
            .next()
            .ok_or_else(|| Error::Malformed("empty line".into()))?;
        let args: Vec<&str> = parts.collect();

        let msg = match token {
            JOIN => {
                let [address] = arity::<1>(token, &args)?;
                Message::Join(address.to_string())
            }
            STORE => {
                let [name, size] = arity::<2>(token, &args)?;
                Message::Store {
                    name: name.to_string(),
                    size: parse_size(size)?,
                }
            }
            STORE_TO => {
                if args.is_empty() {
                    return Err(Error::Malformed(format!("{} without addresses", token)));
                }
                Message::StoreTo(args.iter().map(|a| a.to_string()).collect())
            }
            STORE_ACK => Message::StoreAck(single(token, &args)?),
            STORE_COMPLETE => {
                let [] = arity::<0>(token, &args)?;
                Message::StoreComplete
            }
            LOAD => Message::Load(single(token, &args)?),
            RELOAD => Message::Reload(single(token, &args)?),
            LOAD_FROM => {
                let [address, size] = arity::<2>(token, &args)?;
                Message::LoadFrom {
                    address: address.to_string(),
                    size: parse_size(size)?,
                }
            }
            LOAD_DATA => Message::LoadData(single(token, &args)?),
            REMOVE => Message::Remove(single(token, &args)?),
            REMOVE_ACK => Message::RemoveAck(single(token, &args)?),
            REMOVE_COMPLETE => {
                let [] = arity::<0>(token, &args)?;
                Message::RemoveComplete
            }
            LIST => Message::List(args.iter().map(|a| a.to_string()).collect()),
            ACK => {
                let [] = arity::<0>(token, &args)?;
                Message::Ack
            }
            ERROR_NOT_ENOUGH_WORKERS => Message::ErrorNotEnoughWorkers,
            ERROR_FILE_ALREADY_EXISTS => Message::ErrorFileAlreadyExists,
            ERROR_FILE_DOES_NOT_EXIST => match args.as_slice() {
                [] => Message::ErrorFileDoesNotExist(None),
                [name] => Message::ErrorFileDoesNotExist(Some(name.to_string())),
                _ => return Err(Error::Malformed(line.to_string())),
            },
            ERROR_LOAD => Message::ErrorLoad,
            other => return Err(Error::Malformed(format!("unknown token {}", other))),
        };

        Ok(msg)
    }
}

fn arity<'a, const N: usize>(token: &str, args: &[&'a str]) -> Result<[&'a str; N]> {
    <[&str; N]>::try_from(args).map_err(|_| {
        Error::Malformed(format!(
            "{} expects {} argument(s), got {}",
            token,
            N,
            args.len()
        ))
    })
}

fn single(token: &str, args: &[&str]) -> Result<String> {
    let [name] = arity::<1>(token, args)?;
    Ok(name.to_string())
}

fn parse_size(raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::Malformed(format!("invalid size: {}", raw)))
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Join(address) => write!(f, "{} {}", JOIN, address),
            Message::Store { name, size } => write!(f, "{} {} {}", STORE, name, size),
            Message::StoreTo(addresses) => write!(f, "{} {}", STORE_TO, addresses.join(" ")),
            Message::StoreAck(name) => write!(f, "{} {}", STORE_ACK, name),
            Message::StoreComplete => f.write_str(STORE_COMPLETE),
            Message::Load(name) => write!(f, "{} {}", LOAD, name),
            Message::Reload(name) => write!(f, "{} {}", RELOAD, name),
            Message::LoadFrom { address, size } => write!(f, "{} {} {}", LOAD_FROM, address, size),
            Message::LoadData(name) => write!(f, "{} {}", LOAD_DATA, name),
            Message::Remove(name) => write!(f, "{} {}", REMOVE, name),
            Message::RemoveAck(name) => write!(f, "{} {}", REMOVE_ACK, name),
            Message::RemoveComplete => f.write_str(REMOVE_COMPLETE),
            Message::List(names) => {
                f.write_str(LIST)?;
                for name in names {
                    write!(f, " {}", name)?;
                }
                Ok(())
            }
            Message::Ack => f.write_str(ACK),
            Message::ErrorNotEnoughWorkers => f.write_str(ERROR_NOT_ENOUGH_WORKERS),
            Message::ErrorFileAlreadyExists => f.write_str(ERROR_FILE_ALREADY_EXISTS),
            Message::ErrorFileDoesNotExist(None) => f.write_str(ERROR_FILE_DOES_NOT_EXIST),
            Message::ErrorFileDoesNotExist(Some(name)) => {
                write!(f, "{} {}", ERROR_FILE_DOES_NOT_EXIST, name)
            }
            Message::ErrorLoad => f.write_str(ERROR_LOAD),
        }
    }
}

/// Sending side of a connection. Lines queued here are written in order by the
/// connection's writer task, so any task may reply on any connection.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Queue a message on a connection. Returns false if the connection is gone.
pub fn send(outbox: &Outbox, msg: &Message) -> bool {
    outbox.send(msg.to_string()).is_ok()
}

/// Spawn the writer task for one connection and return its outbox.
///
/// The task exits once every clone of the outbox has been dropped or the
/// peer stops accepting writes.
pub fn spawn_writer<W>(writer: W, peer: String) -> Outbox
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_line(&mut writer, &line).await {
                tracing::warn!("Write to {} failed: {}", peer, e);
                return;
            }
        }
        let _ = writer.shutdown().await;
    });
    tx
}

/// Write one line and flush.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
