//! Node implementation - the scheduler that multiplexes one half-duplex radio.
//!
//! The Node owns every table (neighbours, dedup history, ack ledger) and both
//! message queues. The radio interrupt only pushes a [`RadioEvent`] into the
//! driver's channel; everything else happens here, in the main loop.
//!
//! Each call to [`Node::poll`]:
//!
//! 0. drains radio events: `TxDone` ends a transmission, `RxDone` reads the
//!    frame and runs the forwarding decision (see [`routing`](crate::routing))
//! 1. unless transmitting or paused, takes one message off the RX queue,
//!    deduplicates it, hands it to the type handlers and queues an ACK if asked
//! 2. unless transmitting, takes one message off the TX queue, waits out a
//!    random jitter, then keys the radio
//! 3. puts an idle radio back into continuous receive
//! 4. retries or gives up on messages whose ACK is overdue
//!
//! # Usage
//!
//! ```ignore
//! let mut node: Node<_, _, _> = Node::new(radio, random, clock, uid)?;
//! node.start()?;
//!
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // UI side
//! let event = node.events().receive().await;
//! ```

use core::marker::PhantomData;

use embassy_sync::channel::Channel;

use crate::ack::AckLedger;
use crate::airtime::RangePreset;
use crate::config::{DefaultConfig, NodeConfig};
use crate::history::MessageHistory;
use crate::message::{InfoKey, Message, MessageId, MessageIds, MessageType, PAYLOAD_LEN};
use crate::neighbor::NeighborTable;
use crate::queue::MessageQueue;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, EventChannel, Radio, RadioEvent, Random};
use crate::types::{
    Error, Event, Metrics, ACK_TIMEOUT_AIRTIMES, IDLE_POLL_INTERVAL, JITTER_AIRTIMES,
    MIN_ACK_TIMEOUT,
};
use crate::uid::Uid;
use crate::wire::{Encode, MESSAGE_WIRE_SIZE};

/// What the radio is doing, as far as the scheduler knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioState {
    /// Standby; step 3 of the loop will start receiving.
    Idle,
    /// Continuous receive.
    Receiving,
    /// A frame is on air; waiting for `TxDone`.
    Transmitting,
    /// `TxDone` seen; the radio is in standby again.
    TransmitComplete,
}

/// A message taken from the TX queue, waiting for its jitter to elapse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub message: Message,
    pub key_at: Timestamp,
}

/// The frame currently on air.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlight {
    pub message: Message,
    /// Give up waiting for `TxDone` after this.
    pub deadline: Timestamp,
}

/// A mesh node.
///
/// Generic over:
/// - `Rd`: Radio driver
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `Cfg`: Table sizes (see [`NodeConfig`])
pub struct Node<Rd, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    radio: Rd,
    random: R,
    clock: Clk,

    // Identity
    uid: Uid,
    ids: MessageIds,

    // Tables
    neighbors: NeighborTable,
    history: MessageHistory,
    relay_history: MessageHistory,
    ledger: AckLedger,

    // Queues
    tx_queue: MessageQueue,
    rx_queue: MessageQueue,
    events: EventChannel,

    // Scheduling
    state: RadioState,
    pending_tx: Option<PendingTx>,
    in_flight: Option<InFlight>,
    preset: RangePreset,
    started_at: Timestamp,
    paused: bool,

    // Values answered to REQUEST
    battery: u16,
    callsign: u16,

    metrics: Metrics,
    _config: PhantomData<Cfg>,
}

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Create a node with the given address.
    ///
    /// Fails with [`Error::BroadcastAddress`] if `uid` is
    /// [`BROADCAST`](crate::BROADCAST). Nothing touches the radio until
    /// [`Node::start`].
    pub fn new(radio: Rd, mut random: R, clock: Clk, uid: Uid) -> Result<Self, Error> {
        if uid.is_broadcast() {
            log::error!("refusing broadcast address {} for a device", uid);
            return Err(Error::BroadcastAddress);
        }

        let first_id = random.gen_range(0, 256) as MessageId;
        let started_at = clock.now();

        Ok(Self {
            radio,
            random,
            clock,

            uid,
            ids: MessageIds::starting_at(first_id),

            neighbors: NeighborTable::with_capacity(Cfg::MAX_NEIGHBORS),
            history: MessageHistory::with_capacity(Cfg::MAX_HISTORY),
            relay_history: MessageHistory::with_capacity(Cfg::MAX_HISTORY),
            ledger: AckLedger::new(Cfg::MAX_PENDING_ACKS, Cfg::ACK_RETRIES),

            tx_queue: MessageQueue::new(),
            rx_queue: MessageQueue::new(),
            events: Channel::new(),

            state: RadioState::Idle,
            pending_tx: None,
            in_flight: None,
            preset: RangePreset::Default,
            started_at,
            paused: false,

            battery: 0,
            callsign: 0,

            metrics: Metrics::new(),
            _config: PhantomData,
        })
    }

    /// Check and configure the radio, then start listening.
    ///
    /// This is the only fallible step of a node's life: if it fails the
    /// firmware should halt rather than enter the loop.
    pub fn start(&mut self) -> Result<(), Error<Rd::Error>> {
        if let Err(e) = self.radio.self_test() {
            log::error!("radio self test failed: {:?}", e);
            return Err(Error::SelfTestFailed);
        }
        self.radio.configure(self.preset).map_err(Error::Radio)?;
        self.radio.enter_continuous_receive().map_err(Error::Radio)?;

        self.state = RadioState::Receiving;
        self.started_at = self.clock.now();
        log::info!(
            "node {} up, {} preset, ack timeout {} ms",
            self.uid,
            self.preset,
            self.ack_timeout().as_millis()
        );
        Ok(())
    }

    /// Switch modulation preset. Timeouts and jitter follow the new airtime.
    ///
    /// A frame on air is abandoned; the radio goes back to receive on the next
    /// poll.
    pub fn set_range(&mut self, preset: RangePreset) -> Result<(), Error<Rd::Error>> {
        self.radio.configure(preset).map_err(Error::Radio)?;
        if let Some(f) = self.in_flight.take() {
            log::warn!("{} abandoned by preset change", f.message);
        }
        self.preset = preset;
        self.state = RadioState::Idle;
        log::info!("range preset {}", preset);
        Ok(())
    }

    // --- Accessors ---

    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// `uid` is this device's own address.
    pub fn is_self(&self, uid: Uid) -> bool {
        uid == self.uid
    }

    pub fn state(&self) -> RadioState {
        self.state
    }

    pub fn preset(&self) -> RangePreset {
        self.preset
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn ledger(&self) -> &AckLedger {
        &self.ledger
    }

    pub fn tx_queue(&self) -> &MessageQueue {
        &self.tx_queue
    }

    pub fn rx_queue(&self) -> &MessageQueue {
        &self.rx_queue
    }

    pub fn pending_tx(&self) -> Option<&PendingTx> {
        self.pending_tx.as_ref()
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Channel for application events.
    ///
    /// The UI receives HELLOs, texts, pong round trips, info responses and
    /// delivery failures from here.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Get the radio reference.
    pub fn radio(&self) -> &Rd {
        &self.radio
    }

    /// Get the clock reference.
    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Get the current timestamp from the clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Time since [`Node::start`].
    pub fn uptime(&self, now: Timestamp) -> Duration {
        now.saturating_sub(self.started_at)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Stop (or resume) handing received messages to the handlers. Forwarding
    /// keeps running; the RX queue fills up and then drops.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        log::info!("RX processing {}", if paused { "paused" } else { "resumed" });
    }

    pub fn battery(&self) -> u16 {
        self.battery
    }

    pub fn set_battery(&mut self, level: u16) {
        self.battery = level;
    }

    pub fn callsign(&self) -> u16 {
        self.callsign
    }

    pub fn set_callsign(&mut self, callsign: u16) {
        self.callsign = callsign;
    }

    // --- Timing ---

    /// Time on air of one wire frame with the current preset.
    pub fn frame_airtime(&self) -> Duration {
        self.preset.time_on_air(MESSAGE_WIRE_SIZE)
    }

    /// How long to wait for an ACK before retrying.
    pub fn ack_timeout(&self) -> Duration {
        MIN_ACK_TIMEOUT.max(self.frame_airtime() * ACK_TIMEOUT_AIRTIMES)
    }

    /// How long a relayed frame blocks another relay of the same `(src, id)`.
    ///
    /// Copies heard over other paths arrive within a few airtimes. A sender's
    /// retransmission comes no earlier than one ack timeout after the original.
    pub fn relay_hold(&self) -> Duration {
        Duration::from_millis(self.ack_timeout().as_millis() / 2)
    }

    /// Upper bound of the random delay before each transmission.
    pub fn jitter_window(&self) -> Duration {
        self.frame_airtime() * JITTER_AIRTIMES
    }

    // --- Originating messages ---

    /// Hand out the next message id.
    pub fn next_message_id(&mut self) -> MessageId {
        self.ids.next_id()
    }

    /// Put a message on the TX queue.
    ///
    /// Our own messages that request an ACK are tracked in the ledger. If the
    /// ledger is full the message is still sent, untracked, and
    /// [`Error::LedgerFull`] is returned.
    pub fn enqueue(&mut self, message: Message) -> Result<MessageId, Error> {
        if !self.tx_queue.try_push(message) {
            log::warn!("TX queue full, dropping {}", message);
            self.metrics.queue_drops += 1;
            return Err(Error::QueueFull);
        }
        if message.ack_requested() && message.src == self.uid {
            let now = self.clock.now();
            let timeout = self.ack_timeout();
            self.ledger.track(message, now, timeout)?;
        }
        Ok(message.id)
    }

    /// Announce ourselves to everyone in range.
    pub fn send_hello(&mut self, ack_requested: bool) -> Result<MessageId, Error> {
        let id = self.next_message_id();
        self.enqueue(Message::hello(self.uid, id, ack_requested))
    }

    /// Ping `dst` (or [`BROADCAST`](crate::BROADCAST)); the PONG reports the round trip.
    pub fn send_ping(&mut self, dst: Uid) -> Result<MessageId, Error> {
        let id = self.next_message_id();
        let sent_at = self.clock.now().as_wire_millis();
        self.enqueue(Message::ping(self.uid, dst, id, sent_at))
    }

    pub fn send_text(&mut self, dst: Uid, text_id: u8, ack_requested: bool) -> Result<MessageId, Error> {
        let id = self.next_message_id();
        self.enqueue(Message::text(self.uid, dst, id, text_id).with_ack_requested(ack_requested))
    }

    pub fn send_request(&mut self, dst: Uid, key: InfoKey, ack_requested: bool) -> Result<MessageId, Error> {
        let id = self.next_message_id();
        self.enqueue(Message::request(self.uid, dst, id, key).with_ack_requested(ack_requested))
    }

    pub fn send_raw(
        &mut self,
        dst: Uid,
        data: [u8; PAYLOAD_LEN],
        ack_requested: bool,
    ) -> Result<MessageId, Error> {
        let id = self.next_message_id();
        self.enqueue(Message::raw(self.uid, dst, id, data).with_ack_requested(ack_requested))
    }

    /// Queue an ACK for `message`, addressed to its source.
    pub(crate) fn send_ack(&mut self, message: &Message) {
        let id = self.next_message_id();
        let _ = self.enqueue(Message::ack(self.uid, message.src, id, message.id));
    }

    // --- Main loop ---

    /// Run one iteration of the scheduler. Never blocks.
    pub fn poll(&mut self) {
        let now = self.clock.now();

        while let Ok(event) = self.radio.events().try_receive() {
            self.dispatch_radio_event(event, now);
        }
        self.check_tx_watchdog(now);

        if self.state != RadioState::Transmitting {
            if !self.paused {
                self.process_rx(now);
            }
            self.process_tx(now);
        }

        if matches!(self.state, RadioState::Idle | RadioState::TransmitComplete) {
            self.start_receive();
        }

        self.sweep_acks(now);
    }

    /// Apply one radio event. Failures are logged and the event dropped.
    fn dispatch_radio_event(&mut self, event: RadioEvent, now: Timestamp) {
        if let Err(e) = self.handle_radio_event(event, now) {
            log::warn!("radio event {:?} dropped: {}", event, e);
        }
    }

    /// React to one report from the radio interrupt.
    pub fn handle_radio_event(&mut self, event: RadioEvent, now: Timestamp) -> Result<(), Error<Rd::Error>> {
        match event {
            RadioEvent::TxDone => {
                if self.state != RadioState::Transmitting {
                    log::error!("TX done while {:?}", self.state);
                    self.metrics.anomalies += 1;
                    return Err(Error::UnexpectedTxDone);
                }
                self.state = RadioState::TransmitComplete;
                if let Some(f) = self.in_flight.take() {
                    log::debug!("TX done: {}", f.message);
                }
                Ok(())
            }
            RadioEvent::RxDone => self.read_frame(now).map(|_| ()),
            RadioEvent::Timeout | RadioEvent::Error => {
                if self.state == RadioState::Transmitting {
                    log::warn!("radio {:?} during transmit", event);
                    self.in_flight = None;
                } else {
                    log::debug!("radio {:?} while {:?}", event, self.state);
                }
                self.state = RadioState::Idle;
                Ok(())
            }
        }
    }

    /// Step 1: deliver one received message.
    fn process_rx(&mut self, now: Timestamp) {
        let Some(message) = self.rx_queue.try_pop() else {
            return;
        };
        let wants_ack = message.ack_requested() && message.kind != MessageType::Ack;

        if self.history.seen_before(&message, now) {
            self.metrics.duplicates += 1;
            // The sender keeps retrying until one of our ACKs gets through.
            if wants_ack {
                self.send_ack(&message);
            }
            return;
        }

        log::debug!("RX {}", message);
        self.metrics.delivered += 1;
        self.handle_message(message, now);
        if wants_ack {
            self.send_ack(&message);
        }
    }

    /// Step 2: move one message from the TX queue to the air.
    fn process_tx(&mut self, now: Timestamp) {
        if self.pending_tx.is_none() {
            if let Some(message) = self.tx_queue.try_pop() {
                let window = self.jitter_window().as_millis();
                let delay = Duration::from_millis(self.random.gen_range(0, window));
                self.pending_tx = Some(PendingTx {
                    message,
                    key_at: now + delay,
                });
            }
        }

        if let Some(pending) = self.pending_tx {
            if pending.key_at <= now {
                self.pending_tx = None;
                self.key_radio(pending.message, now);
            }
        }
    }

    fn key_radio(&mut self, mut message: Message, now: Timestamp) {
        if self.is_self(message.src) {
            if message.kind == MessageType::Ping {
                message.timestamp = now.as_wire_millis();
            }
            if message.ack_requested() {
                let timeout = self.ack_timeout();
                self.ledger.rearm(&message, now, timeout);
            }
        }

        let frame = message.encode_to_vec();
        match self.radio.transmit(&frame) {
            Ok(()) => {
                self.state = RadioState::Transmitting;
                self.in_flight = Some(InFlight {
                    message,
                    deadline: now + self.ack_timeout(),
                });
                self.metrics.transmitted += 1;
                log::debug!("TX {}", message);
            }
            Err(e) => {
                log::error!("transmit of {} failed: {:?}", message, e);
                self.metrics.anomalies += 1;
                self.state = RadioState::Idle;
            }
        }
    }

    /// A lost `TxDone` must not wedge the radio in Transmitting.
    fn check_tx_watchdog(&mut self, now: Timestamp) {
        if self.state != RadioState::Transmitting {
            return;
        }
        if let Some(f) = self.in_flight {
            if now >= f.deadline {
                log::warn!("no TX done for {}, back to idle", f.message);
                self.metrics.anomalies += 1;
                self.in_flight = None;
                self.state = RadioState::Idle;
            }
        }
    }

    /// Step 3.
    fn start_receive(&mut self) {
        match self.radio.enter_continuous_receive() {
            Ok(()) => self.state = RadioState::Receiving,
            Err(e) => log::error!("cannot enter receive: {:?}", e),
        }
    }

    /// Step 4.
    fn sweep_acks(&mut self, now: Timestamp) {
        let timeout = self.ack_timeout();
        let tx_queue = &self.tx_queue;
        let outcome = self.ledger.sweep(now, timeout, |m| tx_queue.try_push(m));

        self.metrics.retransmissions += outcome.retransmitted as u64;
        for message in outcome.failed {
            self.metrics.delivery_failures += 1;
            self.push_event(Event::DeliveryFailed {
                to: message.dst,
                id: message.id,
            });
        }
    }

    /// When `run()` next has work to do.
    pub fn next_wake(&self, now: Timestamp) -> Timestamp {
        let can_work = self.state != RadioState::Transmitting;
        let radio_idle = matches!(self.state, RadioState::Idle | RadioState::TransmitComplete);
        let rx_ready = can_work && !self.paused && !self.rx_queue.is_empty();
        let tx_ready = can_work && self.pending_tx.is_none() && !self.tx_queue.is_empty();
        if radio_idle || rx_ready || tx_ready {
            return now;
        }

        let mut wake = now + IDLE_POLL_INTERVAL;
        if let Some(pending) = &self.pending_tx {
            wake = wake.min(pending.key_at);
        }
        if let Some(deadline) = self.ledger.next_deadline() {
            wake = wake.min(deadline);
        }
        if let Some(f) = &self.in_flight {
            wake = wake.min(f.deadline);
        }
        wake
    }

    /// Run the node's main loop.
    ///
    /// Call [`Node::start`] first. Sleeps until a radio event, a push onto the
    /// TX queue, or the next deadline, and polls after each wake-up.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        loop {
            self.poll();

            let now = self.clock.now();
            let wake = self.next_wake(now);
            if wake <= now {
                embassy_futures::yield_now().await;
                continue;
            }

            let result = select3(
                self.radio.events().receive(),
                self.tx_queue.wait_for_push(),
                self.clock.sleep_until(wake),
            )
            .await;

            if let Either3::First(event) = result {
                let now = self.clock.now();
                self.dispatch_radio_event(event, now);
            }
        }
    }

    /// Push an event to the events channel.
    pub(crate) fn push_event(&mut self, event: Event) {
        if self.events.try_send(event).is_err() {
            log::debug!("event channel full, event dropped");
        }
    }

    // --- Internal accessors for other modules ---

    pub(crate) fn radio_mut(&mut self) -> &mut Rd {
        &mut self.radio
    }

    pub(crate) fn neighbors_mut(&mut self) -> &mut NeighborTable {
        &mut self.neighbors
    }

    pub(crate) fn relay_history(&self) -> &MessageHistory {
        &self.relay_history
    }

    pub(crate) fn relay_history_mut(&mut self) -> &mut MessageHistory {
        &mut self.relay_history
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut AckLedger {
        &mut self.ledger
    }

    // Metrics tracking methods

    pub(crate) fn record_received(&mut self) {
        self.metrics.received += 1;
    }

    pub(crate) fn record_relayed(&mut self) {
        self.metrics.relayed += 1;
    }

    pub(crate) fn record_queue_drop(&mut self) {
        self.metrics.queue_drops += 1;
    }

    pub(crate) fn record_decode_error(&mut self) {
        self.metrics.decode_errors += 1;
    }
}
