//! Per-type handling of delivered messages.
//!
//! Runs in the main loop after deduplication. The generic ACK reply for
//! messages that asked for one is sent by the scheduler, not here.

use crate::config::NodeConfig;
use crate::message::{canned_text, Content, InfoKey, Message, MessageId};
use crate::node::Node;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Radio, Random};
use crate::types::{protocol_version, Event};
use crate::uid::Uid;

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Act on a message that passed dedup.
    pub(crate) fn handle_message(&mut self, message: Message, now: Timestamp) {
        let from = message.src;
        match message.content() {
            Content::Ack { acked } => self.handle_ack(from, acked),
            Content::Hello => {
                log::info!("HELLO from {}", from);
                self.push_event(Event::Hello { from });
            }
            Content::Ping { sent_at } => {
                let id = self.next_message_id();
                let _ = self.enqueue(Message::pong(self.uid(), from, id, sent_at));
            }
            Content::Pong { echo } => {
                let rtt = Duration::from_millis(now.as_wire_millis().wrapping_sub(echo) as u64);
                log::info!("PONG from {}, rtt {} ms", from, rtt.as_millis());
                self.push_event(Event::Pong { from, rtt });
            }
            Content::Text { text_id } => {
                let text = canned_text(text_id);
                match text {
                    Some(t) => log::info!("TEXT from {}: {}", from, t),
                    None => log::debug!("TEXT from {} with unknown id {}", from, text_id),
                }
                self.push_event(Event::Text { from, text_id, text });
            }
            Content::Request { key: Ok(key) } => self.handle_request(from, key, now),
            Content::Request { key: Err(raw) } => {
                log::debug!("ignoring REQUEST for unknown key {} from {}", raw, from);
            }
            Content::Response { key: Ok(key), value } => self.handle_response(from, key, value, now),
            Content::Response { key: Err(raw), .. } => {
                log::debug!("ignoring RESPONSE for unknown key {} from {}", raw, from);
            }
            Content::Raw { data } => self.push_event(Event::Raw { from, data }),
        }
    }

    fn handle_ack(&mut self, from: Uid, acked: MessageId) {
        match self.ledger_mut().acknowledge(from, acked) {
            Some(entry) => {
                log::debug!("{} acknowledged by {}", entry.message, from);
                self.push_event(Event::Acked { from, id: acked });
            }
            None => log::debug!("stray ACK for {} from {}", acked, from),
        }
    }

    fn handle_request(&mut self, from: Uid, key: InfoKey, now: Timestamp) {
        let value = self.info_value(key, now);
        let id = self.next_message_id();
        let _ = self.enqueue(Message::response(self.uid(), from, id, key, value));
        self.push_event(Event::InfoRequested { from, key });
    }

    fn handle_response(&mut self, from: Uid, key: InfoKey, value: u16, now: Timestamp) {
        if key == InfoKey::Version {
            let _ = self.neighbors_mut().update_or_insert(from, None, Some(value), now);
        }
        self.push_event(Event::InfoResponse { from, key, value });
    }

    /// Our own value for `key`, as answered to a REQUEST.
    pub fn info_value(&self, key: InfoKey, now: Timestamp) -> u16 {
        match key {
            InfoKey::Version => protocol_version(),
            InfoKey::Battery => self.battery(),
            InfoKey::Uptime => u16::try_from(self.uptime(now).as_secs()).unwrap_or(u16::MAX),
            InfoKey::Callsign => self.callsign(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::traits::test_impls::{MockClock, MockRadio, MockRandom};
    use crate::uid::BROADCAST;
    use crate::DefaultConfig;

    type TestNode = Node<MockRadio, MockRandom, MockClock, DefaultConfig>;

    const ME: Uid = Uid([0x04, 0x05, 0x06]);
    const A: Uid = Uid([0x01, 0x02, 0x03]);

    fn node() -> TestNode {
        Node::new(MockRadio::new(), MockRandom::new(), MockClock::new(), ME).unwrap()
    }

    fn next_event(node: &TestNode) -> Option<Event> {
        node.events().try_receive().ok()
    }

    #[test]
    fn test_ping_queues_pong_with_echo() {
        let mut node = node();
        node.handle_message(Message::ping(A, BROADCAST, 7, 0xDEAD_BEEF), Timestamp::ZERO);

        let pong = node.tx_queue().try_pop().unwrap();
        assert_eq!(pong.kind, MessageType::Pong);
        assert_eq!(pong.src, ME);
        assert_eq!(pong.dst, A);
        assert_eq!(pong.timestamp, 0xDEAD_BEEF);
        assert_eq!(pong.hop_budget(), 0);
    }

    #[test]
    fn test_pong_reports_rtt() {
        let mut node = node();
        node.handle_message(Message::pong(A, ME, 1, 1_000), Timestamp::from_millis(1_250));
        assert_eq!(
            next_event(&node),
            Some(Event::Pong {
                from: A,
                rtt: Duration::from_millis(250)
            })
        );
    }

    #[test]
    fn test_pong_rtt_across_wrap() {
        let mut node = node();
        // Sent 10 ms before the u32 millisecond counter wrapped.
        let echo = u32::MAX - 9;
        let now = Timestamp::from_millis(u32::MAX as u64 + 1 + 40);
        node.handle_message(Message::pong(A, ME, 1, echo), now);
        assert_eq!(
            next_event(&node),
            Some(Event::Pong {
                from: A,
                rtt: Duration::from_millis(50)
            })
        );
    }

    #[test]
    fn test_text_known_and_unknown_ids() {
        let mut node = node();
        node.handle_message(Message::text(A, ME, 1, 10), Timestamp::ZERO);
        node.handle_message(Message::text(A, ME, 2, 200), Timestamp::ZERO);

        assert_eq!(
            next_event(&node),
            Some(Event::Text {
                from: A,
                text_id: 10,
                text: Some("SOS")
            })
        );
        assert_eq!(
            next_event(&node),
            Some(Event::Text {
                from: A,
                text_id: 200,
                text: None
            })
        );
    }

    #[test]
    fn test_request_answers_each_key() {
        let mut node = node();
        node.set_battery(87);
        node.set_callsign(0x1234);

        let now = Timestamp::from_secs(42);
        for key in [InfoKey::Version, InfoKey::Battery, InfoKey::Uptime, InfoKey::Callsign] {
            node.handle_message(Message::request(A, ME, key as u8, key), now);
        }

        let values: alloc::vec::Vec<Content> = core::iter::from_fn(|| node.tx_queue().try_pop())
            .map(|m| {
                assert_eq!(m.dst, A);
                m.content()
            })
            .collect();
        assert_eq!(
            values,
            [
                Content::Response {
                    key: Ok(InfoKey::Version),
                    value: 0x0001
                },
                Content::Response {
                    key: Ok(InfoKey::Battery),
                    value: 87
                },
                Content::Response {
                    key: Ok(InfoKey::Uptime),
                    value: 42
                },
                Content::Response {
                    key: Ok(InfoKey::Callsign),
                    value: 0x1234
                },
            ]
        );
        assert_eq!(
            next_event(&node),
            Some(Event::InfoRequested {
                from: A,
                key: InfoKey::Version
            })
        );
    }

    #[test]
    fn test_uptime_saturates() {
        let node = node();
        let later = Timestamp::from_secs(100_000);
        assert_eq!(node.info_value(InfoKey::Uptime, later), u16::MAX);
    }

    #[test]
    fn test_unknown_request_key_is_ignored() {
        let mut node = node();
        let mut msg = Message::request(A, ME, 1, InfoKey::Version);
        msg.payload[0] = 9;
        node.handle_message(msg, Timestamp::ZERO);
        assert!(node.tx_queue().is_empty());
        assert_eq!(next_event(&node), None);
    }

    #[test]
    fn test_version_response_updates_neighbor() {
        let mut node = node();
        node.route(Message::hello(A, 1, false), -70, Timestamp::ZERO);
        node.handle_message(
            Message::response(A, ME, 2, InfoKey::Version, 0x0102),
            Timestamp::from_secs(1),
        );
        let n = node.neighbors().get(&A).unwrap();
        assert_eq!(n.version, Some(0x0102));
        assert_eq!(n.rssi, Some(-70));
    }

    #[test]
    fn test_ack_clears_ledger_and_reports() {
        let mut node = node();
        let id = node.send_text(A, 0, true).unwrap();
        assert_eq!(node.ledger().len(), 1);

        node.handle_message(Message::ack(A, ME, 99, id), Timestamp::ZERO);
        assert!(node.ledger().is_empty());
        assert_eq!(next_event(&node), Some(Event::Acked { from: A, id }));

        // A second ACK finds nothing.
        node.handle_message(Message::ack(A, ME, 100, id), Timestamp::ZERO);
        assert_eq!(next_event(&node), None);
    }

    #[test]
    fn test_raw_is_passed_through() {
        let mut node = node();
        node.handle_message(Message::raw(A, ME, 3, [1, 2, 3]), Timestamp::ZERO);
        assert_eq!(
            next_event(&node),
            Some(Event::Raw {
                from: A,
                data: [1, 2, 3]
            })
        );
    }
}
