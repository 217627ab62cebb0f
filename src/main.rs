mod blocking;
mod command;
mod config;
mod connection;
mod dispatch;
mod error;
mod keyspace;
mod rdb;
mod replication;
mod resp;
mod state;
mod transaction;
mod value;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match config::parse_args(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let initial_keyspace = rdb::load(&config.dir, &config.dbfilename).await;
    info!(keys = initial_keyspace.len(), "loaded initial keyspace");

    let replicaof = config.replicaof.clone();
    let port = config.port;
    let state = AppState::new(config, initial_keyspace);

    if let Some((host, primary_port)) = replicaof {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = replicate_from_primary(host, primary_port, port, state).await {
                error!(error = %e, "replication link to primary failed; continuing as a read-only server");
            }
        });
    }

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("binding listener on port {port}"))?;
    info!(%port, "listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            connection::handle_client(stream, addr, state).await;
        });
    }
}

/// Performs the replica-side handshake (§4.5) then hands the connection off
/// to the passive apply loop that mutates the local keyspace on every
/// propagated write.
async fn replicate_from_primary(
    host: String,
    primary_port: u16,
    my_port: u16,
    state: Arc<AppState>,
) -> Result<()> {
    let stream = TcpStream::connect((host.as_str(), primary_port))
        .await
        .with_context(|| format!("connecting to primary at {host}:{primary_port}"))?;
    replication_client::run(stream, my_port, state).await
}

mod replication_client {
    use std::sync::Arc;

    use bytes::{Bytes, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tracing::info;

    use crate::command::{self, Command};
    use crate::error::ReplicationError;
    use crate::resp::{self, Value};
    use crate::state::AppState;
    use crate::transaction::Transaction;

    /// Drives the sequential handshake (§4.5 "Replica side handshake"),
    /// then keeps decoding from a persistent buffer forever, applying every
    /// command past the two handshake frames as an ordinary write — the
    /// primary routinely coalesces FULLRESYNC, the snapshot bulk, and
    /// subsequent writes into a single TCP read (§9's data-driven-parse
    /// guidance), so the buffer must survive across `read()` calls.
    pub async fn run(mut stream: TcpStream, my_port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
        let mut buf = BytesMut::with_capacity(4096);

        send_command(&mut stream, &["PING"]).await?;
        expect_simple(&mut stream, &mut buf, "PONG").await?;

        send_command(&mut stream, &["REPLCONF", "listening-port", &my_port.to_string()]).await?;
        expect_simple(&mut stream, &mut buf, "OK").await?;

        send_command(&mut stream, &["REPLCONF", "capa", "psync2"]).await?;
        expect_simple(&mut stream, &mut buf, "OK").await?;

        send_command(&mut stream, &["PSYNC", "?", "-1"]).await?;
        let fullresync = read_frame(&mut stream, &mut buf).await?;
        match &fullresync {
            Value::Simple(s) if s.starts_with("FULLRESYNC") => {
                info!(reply = %s, "primary accepted full resync");
            }
            other => {
                return Err(ReplicationError::UnexpectedReply(format!("{other:?}")).into());
            }
        }

        // The snapshot arrives as a bare bulk (no trailing CRLF); we don't
        // need its contents (§9: full resync never reflects live state), but
        // we must still consume exactly its length-prefixed bytes before
        // resuming normal frame decoding.
        read_bare_bulk(&mut stream, &mut buf).await?;

        let mut tx = Transaction::default();
        loop {
            let (value, _raw) = match resp::decode_frame(&mut buf)? {
                Some(pair) => pair,
                None => {
                    if !fill(&mut stream, &mut buf).await? {
                        return Ok(());
                    }
                    continue;
                }
            };
            apply_from_primary(value, &state, &mut tx, &mut stream).await?;
        }
    }

    async fn apply_from_primary(
        value: Value,
        state: &Arc<AppState>,
        tx: &mut Transaction,
        stream: &mut TcpStream,
    ) -> anyhow::Result<()> {
        let Some(args) = value.as_command_args() else {
            return Ok(());
        };
        let cmd = match command::parse(args) {
            Ok(cmd) => cmd,
            Err(_) => return Ok(()),
        };
        let raw = Bytes::new();
        let is_getack = matches!(&cmd, Command::ReplConf(a) if a.first().map_or(false, |s| s.eq_ignore_ascii_case(b"GETACK")));
        let outcome = crate::dispatch::dispatch(cmd, raw, state, tx).await;
        // §4.5: writes from the primary link never reply, except GETACK.
        if is_getack {
            if let crate::dispatch::Outcome::Reply(v) = outcome {
                let mut out = BytesMut::new();
                v.encode(&mut out);
                stream.write_all(&out).await?;
            }
        }
        Ok(())
    }

    async fn send_command(stream: &mut TcpStream, args: &[&str]) -> anyhow::Result<()> {
        let values: Vec<Value> = args.iter().map(|a| Value::bulk(a.to_string())).collect();
        let mut buf = BytesMut::new();
        Value::array(values).encode(&mut buf);
        stream.write_all(&buf).await?;
        Ok(())
    }

    async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> anyhow::Result<Value> {
        loop {
            if let Some(value) = resp::decode(buf)? {
                return Ok(value);
            }
            if !fill(stream, buf).await? {
                return Err(ReplicationError::Handshake("connection closed mid-handshake".into()).into());
            }
        }
    }

    async fn expect_simple(stream: &mut TcpStream, buf: &mut BytesMut, expected: &str) -> anyhow::Result<()> {
        match read_frame(stream, buf).await? {
            Value::Simple(s) if s == expected => Ok(()),
            other => Err(ReplicationError::UnexpectedReply(format!("{other:?}")).into()),
        }
    }

    /// Reads a `$<len>\r\n<payload>` frame with no trailing CRLF, as PSYNC's
    /// snapshot transfer uses (§4.1's "bare bulk").
    async fn read_bare_bulk(stream: &mut TcpStream, buf: &mut BytesMut) -> anyhow::Result<Bytes> {
        loop {
            if let Some(idx) = find_crlf(buf) {
                if buf.first() != Some(&b'$') {
                    return Err(ReplicationError::Handshake("expected bare bulk snapshot".into()).into());
                }
                let len: usize = std::str::from_utf8(&buf[1..idx])?.parse()?;
                let header_len = idx + 2;
                if buf.len() >= header_len + len {
                    let payload = buf.split_to(header_len + len).split_off(header_len);
                    return Ok(payload.freeze());
                }
            }
            if !fill(stream, buf).await? {
                return Err(ReplicationError::Handshake("connection closed reading snapshot".into()).into());
            }
        }
    }

    fn find_crlf(buf: &BytesMut) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    async fn fill(stream: &mut TcpStream, buf: &mut BytesMut) -> anyhow::Result<bool> {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
        Ok(true)
    }
}
