use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::blocking;
use crate::command::{self, Command};
use crate::error::CommandError;
use crate::keyspace::KeyspaceState;
use crate::replication::Role;
use crate::resp::Value;
use crate::state::AppState;
use crate::transaction::Transaction;

/// What the connection handler should do after a single dispatch call
/// (§4.6's three-way outcome, specialized to what this connection type
/// actually needs to send).
pub enum Outcome {
    /// Encode and write this value as the reply.
    Reply(Value),
    /// The command was queued by an open transaction; no reply payload
    /// beyond a literal `+QUEUED`, which the caller writes directly.
    Queued,
    /// PSYNC succeeded: write `full_resync` as a simple string, then the
    /// bare (no-CRLF) empty snapshot, then treat this connection as a
    /// replica sink.
    BecomeReplicaSink { full_resync: Value },
}

/// Executes one decoded command against shared state, routing through the
/// transaction manager first (§4.3, §4.6). `raw` is the exact bytes the
/// command was decoded from, needed for byte-identical replication
/// propagation (§4.5).
pub async fn dispatch(
    cmd: Command,
    raw: Bytes,
    state: &Arc<AppState>,
    tx: &mut Transaction,
) -> Outcome {
    match cmd {
        Command::Multi => Outcome::Reply(reply_of(tx.begin().map(|_| Value::ok()))),
        Command::Discard => Outcome::Reply(reply_of(tx.discard().map(|_| Value::ok()))),
        Command::Exec => Outcome::Reply(run_exec(tx, state).await),
        Command::Psync(args) => handle_psync(args, state).await,
        other => {
            if tx.in_transaction() {
                tx.enqueue(other, raw);
                Outcome::Queued
            } else {
                let value = execute_single(other, raw, state).await;
                Outcome::Reply(value)
            }
        }
    }
}

fn reply_of(result: Result<Value, CommandError>) -> Value {
    result.unwrap_or_else(CommandError::into_resp)
}

/// Runs a whole EXEC batch under one held keyspace lock, so no other
/// connection's command can interleave between two commands of the same
/// transaction (§5). Replication propagation happens after the lock is
/// released, since it needs the separate replication mutex.
async fn run_exec(tx: &mut Transaction, state: &Arc<AppState>) -> Value {
    let batch = match tx.take_for_exec() {
        Ok(batch) => batch,
        Err(e) => return e.into_resp(),
    };
    let mut replies = Vec::with_capacity(batch.len());
    let mut writes_to_propagate = Vec::new();
    {
        let mut ks = state.keyspace.lock().await;
        for (cmd, raw) in batch {
            let is_write = command::is_write(&cmd);
            let result = execute_with_keyspace(cmd, &mut ks, state).await;
            if is_write && result.is_ok() {
                writes_to_propagate.push(raw);
            }
            replies.push(reply_of(result));
        }
    }
    for raw in writes_to_propagate {
        propagate_if_master(state, raw).await;
    }
    Value::array(replies)
}

/// Runs a single non-transaction-control command and, if it's a successful
/// write, propagates its raw bytes to replicas (§4.5, §4.6).
async fn execute_single(cmd: Command, raw: Bytes, state: &Arc<AppState>) -> Value {
    let is_write = command::is_write(&cmd);
    let result = execute(cmd, state).await;
    if is_write && result.is_ok() {
        propagate_if_master(state, raw).await;
    }
    reply_of(result)
}

async fn propagate_if_master(state: &Arc<AppState>, raw: Bytes) {
    let mut repl = state.replication.lock().await;
    if repl.role() == Role::Master {
        repl.propagate(raw);
    }
}

/// Executes one command, acquiring the keyspace lock itself for the
/// duration of this single command only. BLPOP here uses the real
/// suspending wait (§4.4); it is the only command for which this matters,
/// since it's the only one that can legitimately hold a client past the
/// lifetime of one keyspace-lock acquisition.
async fn execute(cmd: Command, state: &Arc<AppState>) -> Result<Value, CommandError> {
    if let Command::BLPop(key, timeout_secs) = cmd {
        return Ok(run_blpop(key, timeout_secs, state).await);
    }
    let mut ks = state.keyspace.lock().await;
    execute_with_keyspace(cmd, &mut ks, state).await
}

/// Executes one command against an already-held keyspace guard. Used both
/// by `execute` (for a single command, holding the lock just long enough
/// for that command) and by `run_exec` (holding one guard across an entire
/// EXEC batch, per §5). BLPOP reaching this function means it's running
/// inside a transaction, where it must never suspend: it performs an
/// immediate, non-blocking pop attempt, exactly as real Redis does for a
/// blocking command queued in MULTI/EXEC.
async fn execute_with_keyspace(
    cmd: Command,
    ks: &mut KeyspaceState,
    state: &Arc<AppState>,
) -> Result<Value, CommandError> {
    match cmd {
        Command::Ping => Ok(Value::Simple("PONG".to_string())),
        Command::Echo(msg) => Ok(Value::bulk(msg)),
        Command::Get(key) => Ok(ks.get(&key).map(Value::bulk).unwrap_or_else(Value::null_bulk)),
        Command::Set { key, value, px } => {
            ks.set(key, value, px);
            Ok(Value::ok())
        }
        Command::Incr(key) => ks.incr(key).map(Value::Integer),
        Command::Type(key) => Ok(Value::Simple(ks.type_of(&key).to_string())),
        Command::LPush(key, values) => ks.lpush(key, values).map(|n| Value::Integer(n as i64)),
        Command::RPush(key, values) => ks.rpush(key, values).map(|n| Value::Integer(n as i64)),
        Command::LLen(key) => ks.llen(&key).map(|n| Value::Integer(n as i64)),
        Command::LRange(key, start, end) => ks.lrange(&key, start, end).map(Value::array),
        Command::LPop(key, None) => {
            Ok(ks.lpop_one(&key)?.map(Value::bulk).unwrap_or_else(Value::null_bulk))
        }
        Command::LPop(key, Some(count)) => match ks.lpop_many(&key, count)? {
            Some(items) => Ok(Value::array(items.into_iter().map(Value::bulk).collect())),
            None => Ok(Value::Array(None)),
        },
        Command::BLPop(key, _timeout_secs) => match ks.try_blpop_immediate(&key) {
            Some(value) => Ok(Value::array(vec![Value::bulk(key), Value::bulk(value)])),
            None => Ok(Value::Array(None)),
        },
        Command::Keys(pattern) => {
            Ok(Value::array(ks.keys(&pattern).into_iter().map(Value::bulk).collect()))
        }
        Command::ConfigGet(name) => {
            match ks.config_get(&name, &state.config.dir, &state.config.dbfilename) {
                Some((key, value)) => Ok(Value::array(vec![Value::bulk(key), Value::bulk(value)])),
                // Real Redis replies with an empty array for a recognized
                // but absent parameter rather than an error.
                None => Ok(Value::empty_array()),
            }
        }
        Command::InfoReplication => {
            let repl = state.replication.lock().await;
            Ok(Value::bulk(repl.info_section()))
        }
        Command::ReplConf(args) => Ok(handle_replconf(&args, state).await),
        Command::Multi | Command::Discard | Command::Exec | Command::Psync(_) => {
            unreachable!("handled before execute()")
        }
    }
}

async fn run_blpop(key: Bytes, timeout_secs: f64, state: &Arc<AppState>) -> Value {
    let timeout = if timeout_secs == 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(timeout_secs))
    };
    match blocking::blpop(&state.keyspace, key, timeout).await {
        Some((k, v)) => Value::array(vec![Value::bulk(k), Value::bulk(v)]),
        None => Value::Array(None),
    }
}

async fn handle_replconf(args: &[Bytes], state: &Arc<AppState>) -> Value {
    let Some(sub) = args.first() else {
        return CommandError::Syntax.into_resp();
    };
    match String::from_utf8_lossy(sub).to_ascii_uppercase().as_str() {
        "GETACK" => {
            let repl = state.replication.lock().await;
            Value::array(vec![
                Value::bulk("REPLCONF"),
                Value::bulk("ACK"),
                Value::bulk(repl.offset().to_string()),
            ])
        }
        _ => Value::ok(),
    }
}

async fn handle_psync(_args: Vec<Bytes>, state: &Arc<AppState>) -> Outcome {
    let repl = state.replication.lock().await;
    let full_resync = Value::Simple(format!("FULLRESYNC {} {}", repl.replid(), repl.offset()));
    Outcome::BecomeReplicaSink { full_resync }
}
