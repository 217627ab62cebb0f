use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;

use crate::keyspace::KeyspaceState;

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// A suspended BLPOP, registered in `KeyspaceState`'s per-key FIFO queue.
/// `id` disambiguates this waiter from others on the same key so a racing
/// timeout can find (or fail to find) exactly this entry.
pub struct Waiter {
    pub id: u64,
    delivery: oneshot::Sender<(Bytes, Bytes)>,
}

impl Waiter {
    pub fn deliver(self, key: Bytes, value: Bytes) -> Result<(), (Bytes, Bytes)> {
        self.delivery.send((key, value))
    }
}

/// Performs BLPOP's full contract (§4.4): an immediate pop if nothing is
/// queued ahead of us, otherwise suspend until a producer delivers or the
/// deadline elapses. `timeout` of `None` means "block forever".
pub async fn blpop(
    state: &Mutex<KeyspaceState>,
    key: Bytes,
    timeout: Option<Duration>,
) -> Option<(Bytes, Bytes)> {
    let (tx, rx) = oneshot::channel();
    let id = NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed);

    {
        let mut guard = state.lock().await;
        if let Some(value) = guard.try_blpop_immediate(&key) {
            return Some((key, value));
        }
        guard.register_waiter(key.clone(), Waiter { id, delivery: tx });
    }

    tokio::pin!(rx);
    match timeout {
        None => (&mut rx).await.ok(),
        Some(duration) => {
            tokio::select! {
                biased;
                delivered = &mut rx => delivered.ok(),
                _ = sleep(duration) => {
                    let still_queued = {
                        let mut guard = state.lock().await;
                        guard.remove_waiter(&key, id)
                    };
                    if still_queued {
                        None
                    } else {
                        // A producer already dequeued us; the delivery is in
                        // flight on `rx` and will resolve immediately.
                        (&mut rx).await.ok()
                    }
                }
            }
        }
    }
}
