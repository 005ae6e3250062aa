#![forbid(unsafe_code)]
//! hopmesh - Hop-limited flood mesh for handheld LoRa radios
//!
//! Devices exchange short fixed-size messages (presence, ping/pong, canned
//! text, key/value info) over one shared half-duplex channel, with
//! best-effort acknowledgments and bounded flood relaying.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Every table is
//! allocated once at construction with a fixed capacity (see [`config`]).
//!
//! # Key Properties
//!
//! - 3-byte device addresses, all-ones is broadcast
//! - 17-byte wire frames, no length prefix
//! - Duplicates are recognised by `(source, id)` and delivered once
//! - Messages asking for an ACK are retried a bounded number of times
//! - Unicast frames for other devices are relayed while their hop budget lasts;
//!   broadcasts are never relayed
//! - At most one frame on air; every transmission waits a random jitter first
//!
//! # Example (basic usage)
//!
//! ```
//! use hopmesh::{Node, DefaultConfig, RadioState, Uid};
//! use hopmesh::traits::test_impls::{MockRadio, MockRandom, MockClock};
//!
//! let uid = Uid::new([0x01, 0x02, 0x03]);
//! let mut node = Node::<_, _, _, DefaultConfig>::new(
//!     MockRadio::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     uid,
//! )
//! .unwrap();
//!
//! node.start().unwrap();
//! assert_eq!(node.state(), RadioState::Receiving);
//!
//! node.send_hello(false).unwrap();
//! assert_eq!(node.tx_queue().len(), 1);
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use hopmesh::{Node, Radio, Random, Clock, RadioEvent, Uid};
//!
//! // Implement Radio for your driver, Clock and Random for your platform...
//!
//! // let uid = Uid::from_hardware_id(&chip_id).unwrap();
//! // let mut node: Node<_, _, _> = Node::new(radio, rng, clock, uid)?;
//! // node.start()?;   // halt on error
//!
//! // In the DIO interrupt:
//! // radio.events().try_send(RadioEvent::RxDone);
//!
//! // spawn(async move { node.run().await });
//! ```
//!
//! # Module Structure
//!
//! - [`uid`] - Device addresses
//! - [`message`] - Message model and constructors
//! - [`wire`] - Wire format serialization
//! - [`neighbor`] - Neighbour table
//! - [`history`] - Duplicate suppression
//! - [`ack`] - Acknowledgment and retry ledger
//! - [`queue`] - Interrupt-safe message queues
//! - [`airtime`] - Modulation presets and time on air
//! - [`traits`] - Radio, Clock, Random traits
//! - [`node`] - Main Node struct and scheduler
//! - [`routing`] - Receive path and forwarding decision
//! - [`report`] - Console listings
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time table sizes

#![no_std]

// Prevent test features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes a scripted radio and a predictable RNG."
);

extern crate alloc;

pub mod ack;
pub mod airtime;
pub mod config;
mod handlers;
pub mod history;
pub mod message;
pub mod neighbor;
pub mod node;
pub mod queue;
pub mod report;
pub mod routing;
pub mod time;
pub mod traits;
pub mod types;
pub mod uid;
pub mod wire;

// Re-export main types at crate root
pub use ack::{AckEntry, AckLedger, SweepOutcome};
pub use airtime::{LoRaParams, RangePreset};
pub use config::{DefaultConfig, NodeConfig, SmallConfig};
pub use history::{HistoryEntry, MessageHistory};
pub use message::{
    canned_text, Content, Flags, InfoKey, Message, MessageId, MessageType, CANNED_TEXT,
};
pub use neighbor::{Neighbor, NeighborTable};
pub use node::{Node, RadioState};
pub use queue::MessageQueue;
pub use routing::RouteDecision;
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Radio, RadioEvent, Random};
pub use types::{Error, Event, Metrics};
pub use uid::{ParseUidError, Uid, BROADCAST};
pub use wire::{Decode, DecodeError, Encode, MESSAGE_WIRE_SIZE};

// Re-export constants
pub use types::{
    MIN_ACK_TIMEOUT, PING_HOP_BUDGET, PROTOCOL_VERSION_MAJOR, PROTOCOL_VERSION_MINOR,
};

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::traits::test_impls::{MockClock, MockRadio, MockRadioError, MockRandom};

    /// Type alias for test nodes using default config.
    type TestNode = Node<MockRadio, MockRandom, MockClock, DefaultConfig>;

    const ME: Uid = Uid([0x04, 0x05, 0x06]);
    const A: Uid = Uid([0x01, 0x02, 0x03]);

    fn started_node() -> TestNode {
        let mut node: TestNode = Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), ME).unwrap();
        node.start().unwrap();
        node
    }

    /// Poll until the TX side is drained, completing every transmission and
    /// skipping time forward over jitter. Returns what went on air.
    fn flush(node: &mut TestNode) -> Vec<Message> {
        let mut sent = Vec::new();
        for _ in 0..64 {
            node.poll();
            for frame in node.radio().take_sent() {
                sent.push(Message::decode_from_slice(&frame).unwrap());
                node.radio().complete_tx();
            }
            match node.pending_tx() {
                Some(p) => {
                    let at = p.key_at.max(node.now());
                    node.clock().set(at);
                }
                None => {
                    if node.tx_queue().is_empty() && node.state() == RadioState::Receiving {
                        break;
                    }
                }
            }
        }
        sent
    }

    fn events(node: &TestNode) -> Vec<Event> {
        core::iter::from_fn(|| node.events().try_receive().ok()).collect()
    }

    #[test]
    fn test_node_creation() {
        let node: TestNode = Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), ME).unwrap();

        assert_eq!(node.uid(), ME);
        assert!(node.is_self(ME));
        assert!(!node.is_self(A));
        assert!(!node.is_self(BROADCAST));
        assert_eq!(node.state(), RadioState::Idle);
        assert_eq!(node.preset(), RangePreset::Default);
        assert!(node.neighbors().is_empty());
        assert!(node.history().is_empty());
        assert!(node.ledger().is_empty());
        assert_eq!(node.neighbors().capacity(), 16);
        assert_eq!(node.ledger().capacity(), 8);
        // Nothing touched the radio yet.
        assert_eq!(node.radio().configured_preset(), None);
    }

    #[test]
    fn test_small_config_tables() {
        let node: Node<MockRadio, MockRandom, MockClock, SmallConfig> =
            Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), ME).unwrap();
        assert_eq!(node.neighbors().capacity(), 8);
        assert_eq!(node.history().capacity(), 8);
        assert_eq!(node.ledger().capacity(), 4);
    }

    #[test]
    fn test_start_configures_and_listens() {
        let node = started_node();
        assert_eq!(node.state(), RadioState::Receiving);
        assert_eq!(node.radio().configured_preset(), Some(RangePreset::Default));
        assert!(node.radio().is_receiving());
    }

    #[test]
    fn test_start_fails_on_self_test() {
        let mut node: TestNode =
            Node::new(MockRadio::failing_self_test(), MockRandom::new(), MockClock::new(), ME).unwrap();
        assert_eq!(node.start(), Err(Error::SelfTestFailed));
        assert_eq!(node.radio().configured_preset(), None);
        assert_eq!(node.state(), RadioState::Idle);
    }

    #[test]
    fn test_broadcast_address_refused() {
        let result: Result<TestNode, Error> =
            Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), BROADCAST);
        assert!(matches!(result, Err(Error::BroadcastAddress)));
    }

    #[test]
    fn test_first_message_id_is_random() {
        let mut a: TestNode =
            Node::new(MockRadio::new(), MockRandom::with_seed(1), MockClock::new(), ME).unwrap();
        let mut b: TestNode =
            Node::new(MockRadio::new(), MockRandom::with_seed(2), MockClock::new(), ME).unwrap();
        assert_ne!(a.next_message_id(), b.next_message_id());

        let first = a.next_message_id();
        assert_eq!(a.next_message_id(), first.wrapping_add(1));
    }

    #[test]
    fn test_timing_follows_preset() {
        let mut node = started_node();
        assert_eq!(node.frame_airtime(), Duration::from_millis(30));
        assert_eq!(node.ack_timeout(), MIN_ACK_TIMEOUT);
        assert_eq!(node.jitter_window(), Duration::from_millis(60));

        node.set_range(RangePreset::LongRange).unwrap();
        assert_eq!(node.radio().configured_preset(), Some(RangePreset::LongRange));
        assert_eq!(node.frame_airtime(), Duration::from_millis(1975));
        assert_eq!(node.ack_timeout(), Duration::from_millis(15_800));
        assert_eq!(node.jitter_window(), Duration::from_millis(3_950));

        // The radio goes back to receive on the next poll.
        assert_eq!(node.state(), RadioState::Idle);
        node.poll();
        assert_eq!(node.state(), RadioState::Receiving);
    }

    #[test]
    fn test_transmission_waits_out_jitter() {
        let mut node = started_node();
        node.send_text(A, 0, false).unwrap();

        node.poll();
        let key_at = match node.pending_tx() {
            Some(p) => p.key_at,
            // Zero jitter: already on air.
            None => node.now(),
        };
        assert!(key_at < node.now() + node.jitter_window());
        assert!(node.tx_queue().is_empty());

        node.clock().set(key_at);
        node.poll();
        assert_eq!(node.state(), RadioState::Transmitting);
        assert_eq!(node.radio().sent_count(), 1);
        assert_eq!(node.metrics().transmitted, 1);

        node.radio().complete_tx();
        node.poll();
        assert_eq!(node.state(), RadioState::Receiving);
        assert!(node.in_flight().is_none());
    }

    #[test]
    fn test_one_frame_on_air_at_a_time() {
        let mut node = started_node();
        node.send_text(A, 0, false).unwrap();
        node.send_text(A, 1, false).unwrap();

        // Key the first frame without completing it.
        for _ in 0..8 {
            node.poll();
            if node.state() == RadioState::Transmitting {
                break;
            }
            if let Some(p) = node.pending_tx() {
                let at = p.key_at;
                node.clock().set(at);
            }
        }
        assert_eq!(node.state(), RadioState::Transmitting);

        node.clock().advance(Duration::from_millis(500));
        node.poll();
        node.poll();
        assert_eq!(node.radio().sent_count(), 1);
        assert_eq!(node.tx_queue().len(), 1);
        assert!(node.pending_tx().is_none());

        let keyed = node.radio().take_sent();
        assert_eq!(keyed.len(), 1);
        let first = Message::decode_from_slice(&keyed[0]).unwrap();
        assert_eq!(first.content(), Content::Text { text_id: 0 });

        node.radio().complete_tx();
        let rest = flush(&mut node);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content(), Content::Text { text_id: 1 });
    }

    #[test]
    fn test_received_message_delivered_and_acked() {
        let mut node = started_node();
        let msg = Message::text(A, ME, 42, 7).with_ack_requested(true);
        node.radio().inject_rx(msg.encode_to_vec(), -70);

        let sent = flush(&mut node);
        assert_eq!(
            events(&node),
            [Event::Text {
                from: A,
                text_id: 7,
                text: Some("Copy")
            }]
        );
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageType::Ack);
        assert_eq!(sent[0].dst, A);
        assert_eq!(sent[0].content(), Content::Ack { acked: 42 });
        assert_eq!(node.metrics().delivered, 1);
        assert_eq!(node.neighbors().get(&A).unwrap().rssi, Some(-70));
    }

    #[test]
    fn test_duplicate_not_redelivered_but_reacked() {
        let mut node = started_node();
        let msg = Message::text(A, ME, 42, 0).with_ack_requested(true);
        node.radio().inject_rx(msg.encode_to_vec(), -70);
        node.radio().inject_rx(msg.encode_to_vec(), -72);

        let sent = flush(&mut node);
        assert_eq!(events(&node).len(), 1);
        assert_eq!(node.metrics().delivered, 1);
        assert_eq!(node.metrics().duplicates, 1);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.content() == Content::Ack { acked: 42 }));
    }

    #[test]
    fn test_hello_ack_sent_once() {
        let mut node = started_node();
        node.radio().inject_rx(Message::hello(A, 5, true).encode_to_vec(), -50);

        let sent = flush(&mut node);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content(), Content::Ack { acked: 5 });
        assert_eq!(events(&node), [Event::Hello { from: A }]);
    }

    #[test]
    fn test_unacked_message_retried_then_reported() {
        let mut node = started_node();
        let id = node.send_text(A, 3, true).unwrap();

        let mut sent = flush(&mut node);
        while let Some(deadline) = node.ledger().next_deadline() {
            node.clock().set(deadline);
            sent.extend(flush(&mut node));
        }

        // One original plus exactly ACK_RETRIES copies.
        assert_eq!(sent.len(), 1 + DefaultConfig::ACK_RETRIES as usize);
        assert!(sent.iter().all(|m| m.id == id && m.dst == A));
        assert_eq!(node.metrics().retransmissions, DefaultConfig::ACK_RETRIES as u64);
        assert_eq!(node.metrics().delivery_failures, 1);
        assert_eq!(events(&node), [Event::DeliveryFailed { to: A, id }]);
    }

    #[test]
    fn test_ack_stops_retries() {
        let mut node = started_node();
        let id = node.send_text(A, 3, true).unwrap();
        assert_eq!(flush(&mut node).len(), 1);

        node.radio().inject_rx(Message::ack(A, ME, 9, id).encode_to_vec(), -60);
        node.poll();
        assert!(node.ledger().is_empty());
        assert_eq!(events(&node), [Event::Acked { from: A, id }]);

        node.clock().advance(Duration::from_secs(30));
        assert!(flush(&mut node).is_empty());
        assert_eq!(node.metrics().retransmissions, 0);
    }

    #[test]
    fn test_ledger_full_still_sends() {
        let mut node: Node<MockRadio, MockRandom, MockClock, SmallConfig> =
            Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), ME).unwrap();
        for text_id in 0..4 {
            node.send_text(A, text_id, true).unwrap();
        }
        assert_eq!(node.send_text(A, 4, true), Err(Error::LedgerFull));
        assert_eq!(node.ledger().len(), 4);
        assert_eq!(node.tx_queue().len(), 5);
    }

    #[test]
    fn test_full_tx_queue_refuses() {
        let mut node = started_node();
        for _ in 0..8 {
            node.send_hello(false).unwrap();
        }
        assert_eq!(node.send_hello(false), Err(Error::QueueFull));
        assert_eq!(node.metrics().queue_drops, 1);
    }

    #[test]
    fn test_ping_stamped_when_keyed() {
        let mut node = started_node();
        node.clock().set(Timestamp::from_millis(1_000));
        node.send_ping(BROADCAST).unwrap();
        node.clock().set(Timestamp::from_millis(5_000));

        let sent = flush(&mut node);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageType::Ping);
        assert_eq!(sent[0].hop_budget(), PING_HOP_BUDGET);
        assert!(sent[0].timestamp >= 5_000);
        assert!(sent[0].timestamp < 5_060);
    }

    #[test]
    fn test_paused_node_holds_rx_queue() {
        let mut node = started_node();
        node.set_paused(true);
        node.radio().inject_rx(Message::hello(A, 1, false).encode_to_vec(), -50);
        node.poll();
        node.poll();
        assert_eq!(node.rx_queue().len(), 1);
        assert!(events(&node).is_empty());

        node.set_paused(false);
        node.poll();
        assert_eq!(events(&node), [Event::Hello { from: A }]);
    }

    #[test]
    fn test_unexpected_tx_done_is_ignored() {
        let mut node = started_node();
        assert_eq!(
            node.handle_radio_event(RadioEvent::TxDone, Timestamp::ZERO),
            Err(Error::UnexpectedTxDone)
        );
        node.radio().complete_tx();
        node.poll();
        assert_eq!(node.metrics().anomalies, 2);
        assert_eq!(node.state(), RadioState::Receiving);
    }

    #[test]
    fn test_failed_transmit_returns_to_receive() {
        let mut node = started_node();
        node.radio().set_fail_transmit(true);
        node.send_hello(false).unwrap();
        flush(&mut node);

        assert_eq!(node.metrics().transmitted, 0);
        assert_eq!(node.metrics().anomalies, 1);
        assert_eq!(node.state(), RadioState::Receiving);
    }

    #[test]
    fn test_lost_tx_done_does_not_wedge_radio() {
        let mut node = started_node();
        node.send_hello(false).unwrap();
        for _ in 0..8 {
            node.poll();
            if node.state() == RadioState::Transmitting {
                break;
            }
            if let Some(p) = node.pending_tx() {
                let at = p.key_at;
                node.clock().set(at);
            }
        }
        assert_eq!(node.state(), RadioState::Transmitting);

        let deadline = node.in_flight().unwrap().deadline;
        node.clock().set(deadline);
        node.poll();
        assert_eq!(node.state(), RadioState::Receiving);
        assert_eq!(node.metrics().anomalies, 1);
    }

    #[test]
    fn test_radio_error_during_transmit() {
        let mut node = started_node();
        node.send_hello(false).unwrap();
        for _ in 0..8 {
            node.poll();
            if node.state() == RadioState::Transmitting {
                break;
            }
            if let Some(p) = node.pending_tx() {
                let at = p.key_at;
                node.clock().set(at);
            }
        }
        node.radio().raise(RadioEvent::Timeout);
        node.poll();
        assert_eq!(node.state(), RadioState::Receiving);
        assert!(node.in_flight().is_none());
    }

    #[test]
    fn test_next_wake() {
        let mut node = started_node();
        let now = node.now();
        assert_eq!(node.next_wake(now), now + types::IDLE_POLL_INTERVAL);

        node.radio().inject_rx(Message::hello(A, 1, false).encode_to_vec(), -50);
        node.set_paused(true);
        node.poll();
        // Paused: the queued message does not count as work.
        assert_eq!(node.next_wake(now), now + types::IDLE_POLL_INTERVAL);
        node.set_paused(false);
        assert_eq!(node.next_wake(now), now);
    }

    #[test]
    fn test_wake_for_ack_deadline() {
        let mut node = started_node();
        node.send_text(A, 0, true).unwrap();
        flush(&mut node);

        let now = node.now();
        let deadline = node.ledger().next_deadline().unwrap();
        assert!(deadline < now + Duration::from_secs(2));
        assert_eq!(node.next_wake(now), deadline.min(now + types::IDLE_POLL_INTERVAL));
    }

    #[test]
    fn test_report_through_node() {
        let mut node = started_node();
        node.radio().inject_rx(Message::hello(A, 1, false).encode_to_vec(), -61);
        node.poll();

        let now = node.now();
        assert_eq!(report::neighbors(node.neighbors(), now), "01:02:03  rssi  -61  v?  0s ago\n");
        assert!(report::history(node.history(), now).contains("HELLO #1 01:02:03 -> FF:FF:FF"));
        assert_eq!(report::pending_acks(node.ledger(), now), "no pending acks\n");
    }

    #[test]
    fn test_error_display_with_radio_error() {
        use alloc::string::ToString;
        let e: Error<MockRadioError> = Error::Radio(MockRadioError);
        assert_eq!(e.to_string(), "radio error: MockRadioError");
    }
}
