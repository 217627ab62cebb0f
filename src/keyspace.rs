use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;

use crate::blocking::Waiter;
use crate::error::CommandError;
use crate::resp::Value;
use crate::value::{Entry, Payload};

/// The keyspace plus the blocking-pop waiter queues. Both live behind one
/// lock (§5 permits a single global mutex) so that a list push and the
/// delivery of a value to a waiting BLPOP happen atomically with respect to
/// every other connection.
pub struct KeyspaceState {
    entries: HashMap<Bytes, Entry>,
    waiters: HashMap<Bytes, VecDeque<Waiter>>,
}

impl KeyspaceState {
    pub fn new(initial: HashMap<Bytes, Entry>) -> Self {
        KeyspaceState {
            entries: initial,
            waiters: HashMap::new(),
        }
    }

    /// Lazily removes `key` if it is present but expired, mirroring the
    /// "checked on access" rule in §4.2. Returns whether the key is live.
    fn expire_if_due(&mut self, key: &[u8]) -> bool {
        let expired = matches!(self.entries.get(key), Some(e) if e.is_expired());
        if expired {
            self.entries.remove(key);
        }
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: Bytes, value: Bytes, px: Option<u64>) {
        let ttl = px.map(Duration::from_millis);
        self.entries.insert(key, Entry::new_string(value, ttl));
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        if !self.expire_if_due(key) {
            return None;
        }
        match &self.entries.get(key).unwrap().payload {
            Payload::Str(v) => Some(v.clone()),
            Payload::List(_) => None,
        }
    }

    pub fn incr(&mut self, key: Bytes) -> Result<i64, CommandError> {
        self.expire_if_due(&key);
        let current: i64 = match self.entries.get(&key) {
            None => 0,
            Some(entry) => match &entry.payload {
                Payload::Str(v) => std::str::from_utf8(v)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or(CommandError::NotAnInteger)?,
                Payload::List(_) => return Err(CommandError::WrongType),
            },
        };
        let next = current.checked_add(1).ok_or(CommandError::NotAnInteger)?;
        let ttl_preserved = self.entries.get(&key).and_then(|e| e.expires_at);
        self.entries.insert(
            key,
            Entry::new_string_absolute(Bytes::from(next.to_string()), ttl_preserved),
        );
        Ok(next)
    }

    pub fn type_of(&mut self, key: &[u8]) -> &'static str {
        if !self.expire_if_due(key) {
            return "none";
        }
        self.entries.get(key).unwrap().payload.type_name()
    }

    /// LPUSH: each argument is prepended in turn, so the first argument ends
    /// up at the head (§4.2).
    pub fn lpush(&mut self, key: Bytes, values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.expire_if_due(&key);
        let list = self.list_for_write(&key)?;
        for v in values {
            list.push_front(v);
        }
        let len = list.len();
        self.notify_waiters(&key);
        Ok(len)
    }

    pub fn rpush(&mut self, key: Bytes, values: Vec<Bytes>) -> Result<usize, CommandError> {
        self.expire_if_due(&key);
        let list = self.list_for_write(&key)?;
        for v in values {
            list.push_back(v);
        }
        let len = list.len();
        self.notify_waiters(&key);
        Ok(len)
    }

    fn list_for_write(&mut self, key: &Bytes) -> Result<&mut VecDeque<Bytes>, CommandError> {
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new_list(VecDeque::new()));
        match &mut entry.payload {
            Payload::List(l) => Ok(l),
            Payload::Str(_) => Err(CommandError::WrongType),
        }
    }

    pub fn llen(&mut self, key: &[u8]) -> Result<usize, CommandError> {
        if !self.expire_if_due(key) {
            return Ok(0);
        }
        match &self.entries.get(key).unwrap().payload {
            Payload::List(l) => Ok(l.len()),
            Payload::Str(_) => Err(CommandError::WrongType),
        }
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, end: i64) -> Result<Vec<Value>, CommandError> {
        if !self.expire_if_due(key) {
            return Ok(Vec::new());
        }
        let list = match &self.entries.get(key).unwrap().payload {
            Payload::List(l) => l,
            Payload::Str(_) => return Err(CommandError::WrongType),
        };
        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = norm(start).min(len - 1).max(0);
        let end = norm(end).min(len - 1);
        if start > end || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .map(|b| Value::bulk(b.clone()))
            .collect())
    }

    /// LPOP without a count: pops one element, or null if absent/empty.
    pub fn lpop_one(&mut self, key: &[u8]) -> Result<Option<Bytes>, CommandError> {
        if !self.expire_if_due(key) {
            return Ok(None);
        }
        let remove_key = {
            let entry = self.entries.get_mut(key).unwrap();
            let list = match &mut entry.payload {
                Payload::List(l) => l,
                Payload::Str(_) => return Err(CommandError::WrongType),
            };
            let popped = list.pop_front();
            (popped, list.is_empty())
        };
        let (popped, now_empty) = remove_key;
        if now_empty {
            self.entries.remove(key);
        }
        Ok(popped)
    }

    /// LPOP with a count: pops up to `count` elements from the head.
    pub fn lpop_many(&mut self, key: &[u8], count: usize) -> Result<Option<Vec<Bytes>>, CommandError> {
        if !self.expire_if_due(key) {
            return Ok(None);
        }
        let (popped, now_empty) = {
            let entry = self.entries.get_mut(key).unwrap();
            let list = match &mut entry.payload {
                Payload::List(l) => l,
                Payload::Str(_) => return Err(CommandError::WrongType),
            };
            let n = count.min(list.len());
            let popped: Vec<Bytes> = list.drain(..n).collect();
            (popped, list.is_empty())
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(Some(popped))
    }

    pub fn keys(&mut self, pattern: &[u8]) -> Vec<Bytes> {
        let live_keys: Vec<Bytes> = self.entries.keys().cloned().collect();
        for k in &live_keys {
            self.expire_if_due(k);
        }
        // Only the "*" wildcard is supported (§4.2 / Open Question in §9).
        if pattern == b"*" {
            self.entries.keys().cloned().collect()
        } else {
            self.entries
                .keys()
                .filter(|k| k.as_ref() == pattern)
                .cloned()
                .collect()
        }
    }

    /// Immediately dequeues a head element for a fresh BLPOP if the key has a
    /// non-empty list and no prior waiters are already queued (§4.4).
    pub fn try_blpop_immediate(&mut self, key: &[u8]) -> Option<Bytes> {
        if self.waiters.get(key).map_or(false, |q| !q.is_empty()) {
            return None;
        }
        self.lpop_one(key).ok().flatten()
    }

    pub fn register_waiter(&mut self, key: Bytes, waiter: Waiter) {
        self.waiters.entry(key).or_default().push_back(waiter);
    }

    /// Removes a still-queued waiter by id (used when a BLPOP deadline
    /// fires). Returns true if it was found and removed; false means a
    /// producer already dequeued it and delivery is racing the timeout.
    pub fn remove_waiter(&mut self, key: &[u8], id: u64) -> bool {
        let Some(queue) = self.waiters.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        removed
    }

    /// After a push, wakes queued waiters FIFO while both elements and
    /// waiters remain (§4.4's producer interaction).
    fn notify_waiters(&mut self, key: &Bytes) {
        loop {
            let has_waiters = self.waiters.get(key).map_or(false, |q| !q.is_empty());
            if !has_waiters {
                break;
            }
            let has_elements = matches!(
                self.entries.get(key).map(|e| &e.payload),
                Some(Payload::List(l)) if !l.is_empty()
            );
            if !has_elements {
                break;
            }
            let value = match self.lpop_one(key) {
                Ok(Some(v)) => v,
                _ => break,
            };
            let queue = self.waiters.get_mut(key).unwrap();
            let waiter = queue.pop_front().unwrap();
            if queue.is_empty() {
                self.waiters.remove(key);
            }
            // A closed receiver means the connection disconnected already;
            // drop the delivery silently (§7).
            let _ = waiter.deliver(key.clone(), value);
        }
    }

    pub fn config_get(&self, name: &str, dir: &str, dbfilename: &str) -> Option<(&'static str, String)> {
        match name {
            "dir" => Some(("dir", dir.to_string())),
            "dbfilename" => Some(("dbfilename", dbfilename.to_string())),
            _ => None,
        }
    }
}
