//! Acknowledgment and retry bookkeeping.
//!
//! Messages sent with the ack bit are tracked here until an ACK arrives or the
//! retry budget is spent. Entries are keyed by `(peer, id)`, where `peer` is the
//! tracked message's destination: that is exactly what an ACK carries back
//! (its source, and the acked id in its payload).
//!
//! The ledger is bounded. When every slot is busy a new message is reported as
//! [`Error::LedgerFull`] and goes out untracked.

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::message::{Message, MessageId};
use crate::time::{Duration, Timestamp};
use crate::types::Error;
use crate::uid::{Uid, BROADCAST};

/// A message waiting for its ACK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckEntry {
    pub message: Message,
    /// When the next retransmission is due.
    pub deadline: Timestamp,
    pub retries_remaining: u8,
}

/// Result of one [`AckLedger::sweep`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Messages put back on the TX queue.
    pub retransmitted: usize,
    /// Retransmissions refused by a full TX queue; their entries stay.
    pub deferred: usize,
    /// Messages whose retry budget ran out; their entries are gone.
    pub failed: Vec<Message>,
}

/// Bounded map of outstanding acknowledgments.
#[derive(Debug)]
pub struct AckLedger {
    entries: HashMap<(Uid, MessageId), AckEntry>,
    capacity: usize,
    retries: u8,
}

/// Same logical frame. The PING timestamp is rewritten on every transmission,
/// so it is not compared.
fn same_frame(a: &Message, b: &Message) -> bool {
    a.src == b.src && a.kind == b.kind && a.payload == b.payload
}

impl AckLedger {
    pub fn new(capacity: usize, retries: u8) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            retries,
        }
    }

    /// Start (or refresh) tracking of `message`; its timer expires at `now + timeout`.
    ///
    /// Tracking a retransmission of an already tracked message only moves the
    /// deadline, so the remaining budget carries over. A different message
    /// under a live key (ids wrapped around) replaces the old entry.
    pub fn track(&mut self, message: Message, now: Timestamp, timeout: Duration) -> Result<(), Error> {
        let key = (message.dst, message.id);
        let deadline = now + timeout;

        if let Some(entry) = self.entries.get_mut(&key) {
            if !same_frame(&entry.message, &message) {
                log::warn!(
                    "ack slot {} for {} reused before it was acknowledged",
                    message.id,
                    message.dst
                );
                entry.retries_remaining = self.retries;
            }
            entry.message = message;
            entry.deadline = deadline;
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            log::warn!("ack ledger full, {} will not be retried", message);
            return Err(Error::LedgerFull);
        }

        self.entries.insert(
            key,
            AckEntry {
                message,
                deadline,
                retries_remaining: self.retries,
            },
        );
        Ok(())
    }

    /// Move the deadline of an already tracked `message` to `now + timeout`.
    ///
    /// Used when a tracked frame actually goes on air. Returns `false` and
    /// changes nothing if the message is no longer tracked (it was
    /// acknowledged while a retransmission sat in the TX queue).
    pub fn rearm(&mut self, message: &Message, now: Timestamp, timeout: Duration) -> bool {
        match self.entries.get_mut(&(message.dst, message.id)) {
            Some(entry) if same_frame(&entry.message, message) => {
                entry.message = *message;
                entry.deadline = now + timeout;
                true
            }
            _ => false,
        }
    }

    /// Clear the entry an ACK from `from` for `id` refers to.
    ///
    /// A broadcast sent with the ack bit is cleared by the first peer that
    /// acknowledges it.
    pub fn acknowledge(&mut self, from: Uid, id: MessageId) -> Option<AckEntry> {
        self.entries
            .remove(&(from, id))
            .or_else(|| self.entries.remove(&(BROADCAST, id)))
    }

    /// Retransmit or give up on every entry whose deadline has passed.
    ///
    /// `enqueue` offers a copy to the TX queue and reports whether it was
    /// accepted. A refused copy keeps its budget and is offered again after
    /// another `timeout`. Expired entries are handled in deadline order.
    pub fn sweep<F>(&mut self, now: Timestamp, timeout: Duration, mut enqueue: F) -> SweepOutcome
    where
        F: FnMut(Message) -> bool,
    {
        let mut outcome = SweepOutcome::default();

        let mut expired: Vec<(Timestamp, (Uid, MessageId))> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(k, e)| (e.deadline, *k))
            .collect();
        if expired.is_empty() {
            return outcome;
        }
        expired.sort_unstable();

        for (_, key) in expired {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };

            if entry.retries_remaining == 0 {
                let message = entry.message;
                self.entries.remove(&key);
                log::info!("no ACK for {}, giving up", message);
                outcome.failed.push(message);
                continue;
            }

            entry.deadline = now + timeout;
            if enqueue(entry.message) {
                entry.retries_remaining -= 1;
                outcome.retransmitted += 1;
                log::debug!(
                    "retrying {} ({} retries left)",
                    entry.message,
                    entry.retries_remaining
                );
            } else {
                outcome.deferred += 1;
                log::warn!("TX queue full, retry of {} deferred", entry.message);
            }
        }

        outcome
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.values().map(|e| e.deadline).min()
    }

    pub fn get(&self, peer: Uid, id: MessageId) -> Option<&AckEntry> {
        self.entries.get(&(peer, id))
    }

    /// Outstanding entries sorted by deadline.
    pub fn pending(&self) -> Vec<AckEntry> {
        let mut entries: Vec<AckEntry> = self.entries.values().copied().collect();
        entries.sort_unstable_by_key(|e| (e.deadline, e.message.dst, e.message.id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
