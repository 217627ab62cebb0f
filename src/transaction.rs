use bytes::Bytes;

use crate::command::Command;
use crate::error::CommandError;

/// Per-connection MULTI/EXEC/DISCARD state machine (§4.3). Each queued entry
/// keeps the raw bytes it arrived as, so EXEC can still propagate writes to
/// replicas byte-for-byte (§4.5, §8 invariant 9) despite having deferred
/// their execution.
#[derive(Default)]
pub struct Transaction {
    queued: Option<Vec<(Command, Bytes)>>,
}

impl Transaction {
    pub fn in_transaction(&self) -> bool {
        self.queued.is_some()
    }

    pub fn begin(&mut self) -> Result<(), CommandError> {
        if self.queued.is_some() {
            return Err(CommandError::NestedMulti);
        }
        self.queued = Some(Vec::new());
        Ok(())
    }

    pub fn discard(&mut self) -> Result<(), CommandError> {
        if self.queued.take().is_none() {
            return Err(CommandError::DiscardWithoutMulti);
        }
        Ok(())
    }

    /// Takes the queued batch for EXEC to run, leaving the connection back
    /// in OUT_OF_TX. Errors if EXEC arrives with no open transaction.
    pub fn take_for_exec(&mut self) -> Result<Vec<(Command, Bytes)>, CommandError> {
        self.queued.take().ok_or(CommandError::ExecWithoutMulti)
    }

    /// Appends `cmd` to the open queue. Only call this once the caller has
    /// confirmed a transaction is open and `cmd` isn't itself MULTI/EXEC/
    /// DISCARD (those are handled by the dispatcher directly, never queued).
    pub fn enqueue(&mut self, cmd: Command, raw: Bytes) {
        self.queued
            .as_mut()
            .expect("enqueue called outside a transaction")
            .push((cmd, raw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn queues_while_open_and_drains_in_order() {
        let mut tx = Transaction::default();
        tx.begin().unwrap();
        tx.enqueue(Command::Ping, Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"));
        tx.enqueue(
            Command::Get(Bytes::from_static(b"k")),
            Bytes::from_static(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"),
        );

        let batch = tx.take_for_exec().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(!tx.in_transaction());
    }

    #[test]
    fn exec_without_multi_errors() {
        let mut tx = Transaction::default();
        assert!(matches!(tx.take_for_exec(), Err(CommandError::ExecWithoutMulti)));
    }

    #[test]
    fn discard_without_multi_errors() {
        let mut tx = Transaction::default();
        assert!(matches!(tx.discard(), Err(CommandError::DiscardWithoutMulti)));
    }

    #[test]
    fn discard_drops_queue_then_exec_errors_again() {
        let mut tx = Transaction::default();
        tx.begin().unwrap();
        tx.enqueue(Command::Ping, Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"));
        tx.discard().unwrap();
        assert!(matches!(tx.take_for_exec(), Err(CommandError::ExecWithoutMulti)));
    }
}
