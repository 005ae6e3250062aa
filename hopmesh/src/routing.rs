//! Receive path and the forwarding decision.
//!
//! A frame read from the radio is decoded and then either dropped, queued for
//! local delivery, or put back on the TX queue one hop further. This runs
//! before deduplication; the RX side dedups in the main loop.
//!
//! Only unicast frames addressed to someone else are relayed. Broadcasts are
//! delivered and never relayed, whatever their hop budget. A separate relay
//! history makes sure a frame heard twice is relayed once. A frame that asks
//! for an ACK may be relayed again once [`Node::relay_hold`] has passed, so the
//! sender's retries can get past a lost second hop.

use crate::config::NodeConfig;
use crate::message::Message;
use crate::node::Node;
use crate::time::Timestamp;
use crate::traits::{Clock, Radio, Random, MAX_FRAME_LEN};
use crate::types::Error;
use crate::wire::{Decode, DecodeError, MESSAGE_WIRE_SIZE};

/// Outcome of the forwarding decision for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// Our own frame heard back.
    OwnEcho,
    /// Queued for local delivery.
    Deliver,
    /// Relay copy queued with one hop less.
    Relay,
    /// Addressed elsewhere with no hop budget left.
    Exhausted,
    /// Addressed elsewhere and already relayed once.
    AlreadyRelayed,
    /// The target queue was full; the message is gone.
    Dropped,
}

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Read the frame behind an `RxDone` and route it.
    pub(crate) fn read_frame(&mut self, now: Timestamp) -> Result<RouteDecision, Error<Rd::Error>> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = self
            .radio_mut()
            .read_received_buffer(&mut buf)
            .map_err(Error::Radio)?;
        let rssi = self.radio_mut().link_quality();
        self.record_received();

        let message = self
            .decode_frame(&buf[..len.min(MAX_FRAME_LEN)])
            .map_err(|e| e.widen::<Rd::Error>())?;
        Ok(self.route(message, rssi, now))
    }

    fn decode_frame(&mut self, frame: &[u8]) -> Result<Message, Error> {
        if frame.len() != MESSAGE_WIRE_SIZE {
            log::warn!("dropping {}-byte frame", frame.len());
            self.record_decode_error();
            return Err(Error::InvalidMessage);
        }
        match Message::decode_from_slice(frame) {
            Ok(message) => Ok(message),
            Err(DecodeError::UnknownType(kind)) => {
                log::debug!("ignoring frame of unknown type {}", kind);
                self.record_decode_error();
                Err(Error::InvalidMessage)
            }
            Err(e) => {
                log::warn!("undecodable frame: {}", e);
                self.record_decode_error();
                Err(Error::InvalidMessage)
            }
        }
    }

    /// Decide what happens to a freshly received message.
    ///
    /// 1. our own source: dropped
    /// 2. the source goes into the neighbour table with `rssi`
    /// 3. for us or broadcast: RX queue
    /// 4. for someone else: relayed with one hop less while budget remains
    pub fn route(&mut self, message: Message, rssi: i16, now: Timestamp) -> RouteDecision {
        if self.is_self(message.src) {
            return RouteDecision::OwnEcho;
        }

        // A full table is logged inside and does not stop the message.
        let _ = self
            .neighbors_mut()
            .update_or_insert(message.src, Some(rssi), None, now);

        if self.is_self(message.dst) || message.dst.is_broadcast() {
            if self.rx_queue().try_push(message) {
                return RouteDecision::Deliver;
            }
            log::warn!("RX queue full, dropping {}", message);
            self.record_queue_drop();
            return RouteDecision::Dropped;
        }

        let Some(copy) = message.relayed() else {
            log::debug!("hop budget spent, not relaying {}", message);
            return RouteDecision::Exhausted;
        };
        if let Some(entry) = self.relay_history().find(&message) {
            // A retransmission waiting for an ACK may pass once the hold is over.
            let held = now.saturating_sub(entry.received_at) < self.relay_hold();
            if !message.ack_requested() || held {
                log::debug!("already relayed {}", message);
                return RouteDecision::AlreadyRelayed;
            }
        }
        if !self.tx_queue().try_push(copy) {
            log::warn!("TX queue full, not relaying {}", message);
            self.record_queue_drop();
            return RouteDecision::Dropped;
        }
        self.relay_history_mut().record(&message, now);
        log::debug!("relaying {}", copy);
        self.record_relayed();
        RouteDecision::Relay
    }
}
