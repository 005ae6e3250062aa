//! Bounded FIFOs between producers and the main loop.
//!
//! A [`MessageQueue`] is an `embassy-sync` channel of [`Message`] values plus a
//! wake-up signal for the async loop. It uses `CriticalSectionRawMutex`, so:
//!
//! - `try_push` is safe from interrupt context and from any task
//! - `try_pop` never blocks; it returns `None` on an empty queue
//! - a push on a full queue fails and leaves the queue unchanged
//!
//! Ordering is strict FIFO per queue. Nothing is ordered across queues.
//!
//! # Usage Contract
//!
//! - Forwarding, handlers, ack retries, console/UI -> TX queue `try_push`
//! - Forwarding (local delivery) -> RX queue `try_push`
//! - Scheduler -> `try_pop` on both, one message per loop iteration each

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::message::Message;
use crate::types::MESSAGE_QUEUE_SIZE;

/// Mutex type used for every channel in the crate.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Fixed-capacity FIFO of messages.
pub struct MessageQueue {
    channel: Channel<ChannelMutex, Message, MESSAGE_QUEUE_SIZE>,
    pushed: Signal<ChannelMutex, ()>,
}

impl MessageQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            pushed: Signal::new(),
        }
    }

    /// Append without blocking. Returns `false` (and drops nothing already
    /// queued) when the queue is full.
    pub fn try_push(&self, message: Message) -> bool {
        match self.channel.try_send(message) {
            Ok(()) => {
                self.pushed.signal(());
                true
            }
            Err(_) => false,
        }
    }

    /// Take the oldest message, if any.
    pub fn try_pop(&self) -> Option<Message> {
        self.channel.try_receive().ok()
    }

    /// Resolve once something has been pushed since the last wake-up.
    pub async fn wait_for_push(&self) {
        self.pushed.wait().await
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    pub const fn capacity(&self) -> usize {
        MESSAGE_QUEUE_SIZE
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uid::Uid;

    fn msg(id: u8) -> Message {
        Message::text(Uid::new([1, 2, 3]), Uid::new([4, 5, 6]), id, 0)
    }

    #[test]
    fn test_fifo_order() {
        let q = MessageQueue::new();
        assert!(q.try_push(msg(1)));
        assert!(q.try_push(msg(2)));
        assert!(q.try_push(msg(3)));
        assert_eq!(q.try_pop().map(|m| m.id), Some(1));
        assert_eq!(q.try_pop().map(|m| m.id), Some(2));
        assert!(q.try_push(msg(4)));
        assert_eq!(q.try_pop().map(|m| m.id), Some(3));
        assert_eq!(q.try_pop().map(|m| m.id), Some(4));
    }

    #[test]
    fn test_push_on_full_queue_fails_without_change() {
        let q = MessageQueue::new();
        for id in 0..q.capacity() as u8 {
            assert!(q.try_push(msg(id)));
        }
        assert!(q.is_full());

        assert!(!q.try_push(msg(99)));
        assert_eq!(q.len(), q.capacity());

        for id in 0..q.capacity() as u8 {
            assert_eq!(q.try_pop().map(|m| m.id), Some(id));
        }
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn test_pop_on_empty_queue_returns_none() {
        let q = MessageQueue::default();
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.len(), 0);
    }
}
