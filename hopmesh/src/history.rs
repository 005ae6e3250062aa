//! Duplicate suppression.
//!
//! A cyclic log of recently processed messages. A message is a duplicate when
//! an entry has the same source AND the same id; ids alone are only unique per
//! sender. New arrivals overwrite the oldest slot unconditionally.

use alloc::vec::Vec;

use crate::message::Message;
use crate::time::Timestamp;

/// One remembered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub message: Message,
    pub received_at: Timestamp,
}

/// Fixed-size ring of [`HistoryEntry`].
#[derive(Debug)]
pub struct MessageHistory {
    slots: Vec<HistoryEntry>,
    capacity: usize,
    /// Next slot to overwrite once `slots` is full.
    head: usize,
}

impl MessageHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// True if `(src, id)` is already in the log.
    pub fn contains(&self, message: &Message) -> bool {
        self.find(message).is_some()
    }

    /// The entry recorded under `(src, id)`, if any.
    pub fn find(&self, message: &Message) -> Option<&HistoryEntry> {
        self.slots
            .iter()
            .find(|e| e.message.src == message.src && e.message.id == message.id)
    }

    /// Store `message` at `now`, refreshing the time of an existing entry in
    /// place instead of adding a second one.
    pub fn record(&mut self, message: &Message, now: Timestamp) {
        if let Some(entry) = self
            .slots
            .iter_mut()
            .find(|e| e.message.src == message.src && e.message.id == message.id)
        {
            entry.received_at = now;
            return;
        }
        self.insert(message, now);
    }

    /// Check and record in one step.
    ///
    /// Returns `true` without touching the log if the message was seen. Otherwise
    /// stores it in the next slot (evicting the oldest when full) and returns
    /// `false`.
    pub fn seen_before(&mut self, message: &Message, now: Timestamp) -> bool {
        if self.contains(message) {
            log::debug!("message {} from {} already seen", message.id, message.src);
            return true;
        }
        self.insert(message, now);
        false
    }

    fn insert(&mut self, message: &Message, now: Timestamp) {
        if self.capacity == 0 {
            return;
        }

        let entry = HistoryEntry {
            message: *message,
            received_at: now,
        };
        if self.slots.len() < self.capacity {
            self.slots.push(entry);
        } else {
            self.slots[self.head] = entry;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        let split = if self.slots.len() < self.capacity {
            0
        } else {
            self.head
        };
        self.slots[split..].iter().chain(self.slots[..split].iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
