use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::keyspace::KeyspaceState;
use crate::replication::ReplicationState;
use crate::value::Entry;

/// Process-wide shared state, owned by the connection orchestrator and handed
/// to every connection task as an `Arc` clone (§9's re-architecture guidance:
/// no ad hoc global mutable maps).
pub struct AppState {
    pub config: Config,
    pub keyspace: Mutex<KeyspaceState>,
    pub replication: Mutex<ReplicationState>,
}

impl AppState {
    pub fn new(config: Config, initial: HashMap<Bytes, Entry>) -> Arc<Self> {
        let replicaof = config.replicaof.clone();
        Arc::new(AppState {
            config,
            keyspace: Mutex::new(KeyspaceState::new(initial)),
            replication: Mutex::new(ReplicationState::new(replicaof)),
        })
    }
}
