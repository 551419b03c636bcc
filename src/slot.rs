//! Single-slot, single-use result hand-off.
//!
//! Each query owns a [`SlotWriter`]; the caller blocked on the query holds the
//! matching [`SlotReader`]. The slot is a capacity-one channel: posting never
//! blocks and is a no-op once a value is already there.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::query::Reply;

/// Terminal event for one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A line matched the query's pattern.
    Matched(Reply),
    /// The query was purged as expired before any line matched.
    TimedOut,
}

/// Creates a connected writer/reader pair.
#[must_use]
pub fn pair() -> (SlotWriter, SlotReader) {
    let (tx, rx) = bounded(1);
    (SlotWriter { tx }, SlotReader { rx })
}

/// Writing half. Consumed by the first post.
#[derive(Debug)]
pub struct SlotWriter {
    tx: Sender<Outcome>,
}

impl SlotWriter {
    /// Posts `outcome` if the slot is still empty and the reader still exists.
    ///
    /// Never blocks. Returns whether the value was stored.
    pub fn post(self, outcome: Outcome) -> bool {
        match self.tx.try_send(outcome) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Reading half, held by the blocked caller.
#[derive(Debug)]
pub struct SlotReader {
    rx: Receiver<Outcome>,
}

impl SlotReader {
    /// Waits up to `timeout` for the terminal outcome.
    ///
    /// Returns `None` when nothing arrives in time, or when the writer was
    /// dropped without posting (the query left the registry unresolved).
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> Option<Outcome> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes the outcome if one has already been posted.
    #[must_use]
    pub fn try_take(&self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}
