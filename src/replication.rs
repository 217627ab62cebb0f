use std::net::SocketAddr;

use bytes::Bytes;
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The fixed empty-RDB snapshot the primary ships on every full resync
/// (§6). Reference behavior never reflects the live keyspace (§9 Open
/// Questions) — this byte string is the canonical empty-database RDB image.
pub const EMPTY_RDB_SNAPSHOT: &[u8] = &[
    0x52, 0x45, 0x44, 0x49, 0x53, 0x30, 0x30, 0x31, 0x31, // "REDIS0011"
    0xFA, 0x09, 0x72, 0x65, 0x64, 0x69, 0x73, 0x2D, 0x76, 0x65, 0x72, 0x05, 0x37, 0x2E, 0x32, 0x2E,
    0x30, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5A, 0xA2,
];

/// One replica attached to this primary. Propagation writes the raw bytes
/// this connection's handler received (§4.5), so replication is exact and
/// order-preserving per the bounded mpsc channel's FIFO delivery.
pub struct ReplicaSink {
    pub addr: SocketAddr,
    sender: mpsc::Sender<Bytes>,
}

impl ReplicaSink {
    /// Queues `bytes` for this sink. A full or closed channel means the
    /// replica's write side has stalled or disconnected; the caller drops
    /// the sink from the registry in that case (§4.5, §7).
    pub fn try_send(&self, bytes: Bytes) -> bool {
        self.sender.try_send(bytes).is_ok()
    }
}

pub struct ReplicationState {
    role: Role,
    replid: String,
    offset: u64,
    sinks: Vec<ReplicaSink>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Master,
    Slave,
}

impl ReplicationState {
    pub fn new(replica_of: Option<(String, u16)>) -> Self {
        ReplicationState {
            role: if replica_of.is_some() { Role::Slave } else { Role::Master },
            replid: generate_replid(),
            offset: 0,
            sinks: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn info_section(&self) -> String {
        match self.role {
            Role::Master => format!(
                "role:master\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n",
                self.replid, self.offset
            ),
            Role::Slave => format!("role:slave\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n", self.replid, self.offset),
        }
    }

    /// Registers a connection (post-PSYNC) as a replication sink, returning
    /// a receiver the connection's write task drains to forward bytes in
    /// order (§5's per-sink ordering guarantee).
    pub fn register_sink(&mut self, addr: SocketAddr) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(256);
        self.sinks.push(ReplicaSink { addr, sender: tx });
        info!(%addr, "replica attached");
        rx
    }

    pub fn remove_sink(&mut self, addr: SocketAddr) {
        let before = self.sinks.len();
        self.sinks.retain(|s| s.addr != addr);
        if self.sinks.len() != before {
            info!(%addr, "replica detached");
        }
    }

    /// Forwards a write command's original RESP bytes to every attached
    /// replica, dropping any sink whose channel has backed up or closed
    /// (§4.5, §7: failures never propagate back to the originating client).
    pub fn propagate(&mut self, raw: Bytes) {
        let mut dead = Vec::new();
        for sink in &self.sinks {
            if !sink.try_send(raw.clone()) {
                dead.push(sink.addr);
            }
        }
        for addr in dead {
            warn!(%addr, "dropping unresponsive replica sink");
            self.remove_sink(addr);
        }
    }
}

fn generate_replid() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}
