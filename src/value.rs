use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

/// The payload a keyspace entry can hold. A key's kind is fixed for its
/// lifetime (§3): once created as a list, SET on it still overwrites it
/// (Redis semantics are unconditional), but LPUSH/RPUSH/LLEN on an existing
/// string key is a type error.
#[derive(Debug, Clone)]
pub enum Payload {
    Str(Bytes),
    List(VecDeque<Bytes>),
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Str(_) => "string",
            Payload::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub payload: Payload,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new_string(value: Bytes, ttl: Option<Duration>) -> Self {
        Entry {
            payload: Payload::Str(value),
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    pub fn new_string_absolute(value: Bytes, expires_at: Option<Instant>) -> Self {
        Entry {
            payload: Payload::Str(value),
            expires_at,
        }
    }

    pub fn new_list(items: VecDeque<Bytes>) -> Self {
        Entry {
            payload: Payload::List(items),
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(deadline) if Instant::now() >= deadline)
    }
}
