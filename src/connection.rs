use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::command;
use crate::dispatch::{self, Outcome};
use crate::replication::EMPTY_RDB_SNAPSHOT;
use crate::resp::{self, Value};
use crate::state::AppState;
use crate::transaction::Transaction;

const READ_CHUNK: usize = 4096;

/// Owns one inbound client connection end to end: read, decode, dispatch,
/// write, until the peer closes or decoding fails unrecoverably (§4.7).
pub async fn handle_client(stream: TcpStream, addr: SocketAddr, state: Arc<AppState>) {
    debug!(%addr, "client connected");
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut tx = Transaction::default();

    loop {
        match resp::decode_frame(&mut buf) {
            Ok(Some((value, raw))) => {
                if handle_one_frame(value, raw, &state, &mut tx, &mut writer, addr).await.is_err() {
                    // Either a protocol/IO error, or this connection was just
                    // handed off to replica-sink forwarding mode — either way
                    // the request/reply loop for this connection is done.
                    break;
                }
            }
            Ok(None) => {
                if !fill_buffer(&mut reader, &mut buf).await {
                    break;
                }
            }
            Err(e) => {
                warn!(%addr, error = %e, "closing connection after decode error");
                break;
            }
        }
    }

    state.replication.lock().await.remove_sink(addr);
    debug!(%addr, "client disconnected");
}

async fn fill_buffer(reader: &mut (impl AsyncReadExt + Unpin), buf: &mut BytesMut) -> bool {
    let mut chunk = [0u8; READ_CHUNK];
    match reader.read(&mut chunk).await {
        Ok(0) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
        Err(_) => false,
    }
}

async fn handle_one_frame(
    value: Value,
    raw: Bytes,
    state: &Arc<AppState>,
    tx: &mut Transaction,
    writer: &mut (impl AsyncWriteExt + Unpin),
    addr: SocketAddr,
) -> std::io::Result<()> {
    let Some(args) = value.as_command_args() else {
        let _ = write_value(writer, &Value::error("ERR Protocol error: expected array of bulk strings")).await;
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "non-command frame"));
    };
    let cmd = match command::parse(args) {
        Ok(cmd) => cmd,
        Err(e) => return write_value(writer, &e.into_resp()).await,
    };

    match dispatch::dispatch(cmd, raw, state, tx).await {
        Outcome::Reply(value) => write_value(writer, &value).await,
        Outcome::Queued => writer.write_all(b"+QUEUED\r\n").await,
        Outcome::BecomeReplicaSink { full_resync } => {
            write_value(writer, &full_resync).await?;
            let mut snapshot_buf = BytesMut::new();
            resp::encode_bare_bulk(EMPTY_RDB_SNAPSHOT, &mut snapshot_buf);
            writer.write_all(&snapshot_buf).await?;
            let rx = state.replication.lock().await.register_sink(addr);
            info!(%addr, "entering replica sink forwarding mode");
            forward_to_replica(writer, rx).await;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "became replica sink"))
        }
    }
}

async fn write_value(writer: &mut (impl AsyncWriteExt + Unpin), value: &Value) -> std::io::Result<()> {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    writer.write_all(&buf).await
}

/// Drains propagated write bytes to a registered replica sink, preserving
/// primary-issue order (§5). Runs until the channel closes (sink removed by
/// the replication manager) or the socket write fails.
async fn forward_to_replica(
    writer: &mut (impl AsyncWriteExt + Unpin),
    mut rx: tokio::sync::mpsc::Receiver<Bytes>,
) {
    while let Some(bytes) = rx.recv().await {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
    }
}
