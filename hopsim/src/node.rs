//! SimNode wrapper for simulated hopmesh nodes.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use hopmesh::config::DefaultConfig;
use hopmesh::traits::{Clock, Radio, RadioEvent, RadioEventChannel, Random};
use hopmesh::{Duration, Error, Event, Node, RadioState, RangePreset, Timestamp, Uid};

/// Radio error raised by the simulated driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimRadioError {
    /// `read_received_buffer` without a frame waiting.
    NothingReceived,
}

/// Simulated half-duplex radio.
///
/// The simulator takes transmitted frames with [`SimRadio::take_sent`],
/// hands frames to other nodes with [`SimRadio::deliver`], and reports the
/// end of a transmission with [`SimRadio::complete_tx`].
pub struct SimRadio {
    events: RadioEventChannel,
    sent: RefCell<Vec<Vec<u8>>>,
    rx: RefCell<VecDeque<(Vec<u8>, i16)>>,
    last_rssi: Cell<i16>,
    preset: Cell<RangePreset>,
    receiving: Cell<bool>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self {
            events: Channel::new(),
            sent: RefCell::new(Vec::new()),
            rx: RefCell::new(VecDeque::new()),
            last_rssi: Cell::new(0),
            preset: Cell::new(RangePreset::Default),
            receiving: Cell::new(false),
        }
    }

    /// Offer a frame that finished arriving over the air.
    ///
    /// Returns `false` if the radio was not listening (or its interrupt
    /// channel was full) and the frame is lost.
    pub fn deliver(&self, frame: Vec<u8>, rssi: i16) -> bool {
        if !self.receiving.get() {
            return false;
        }
        if self.events.try_send(RadioEvent::RxDone).is_err() {
            return false;
        }
        self.rx.borrow_mut().push_back((frame, rssi));
        true
    }

    /// Report the end of the current transmission.
    pub fn complete_tx(&self) {
        let _ = self.events.try_send(RadioEvent::TxDone);
    }

    /// Take all frames keyed since the last call.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn preset(&self) -> RangePreset {
        self.preset.get()
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.get()
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimRadio {
    type Error = SimRadioError;

    fn self_test(&mut self) -> Result<(), SimRadioError> {
        Ok(())
    }

    fn configure(&mut self, preset: RangePreset) -> Result<(), SimRadioError> {
        self.preset.set(preset);
        self.receiving.set(false);
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), SimRadioError> {
        self.receiving.set(false);
        self.sent.borrow_mut().push(frame.to_vec());
        Ok(())
    }

    fn enter_continuous_receive(&mut self) -> Result<(), SimRadioError> {
        self.receiving.set(true);
        Ok(())
    }

    fn read_received_buffer(&mut self, buf: &mut [u8]) -> Result<usize, SimRadioError> {
        let (frame, rssi) = self
            .rx
            .borrow_mut()
            .pop_front()
            .ok_or(SimRadioError::NothingReceived)?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        self.last_rssi.set(rssi);
        Ok(frame.len())
    }

    fn link_quality(&mut self) -> i16 {
        self.last_rssi.get()
    }

    fn events(&self) -> &RadioEventChannel {
        &self.events
    }
}

/// Mock clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG, one per node.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + ((self.state >> 33) % range)
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimRadio, SimRandom, SimClock, DefaultConfig>;

/// Wrapper around a hopmesh Node for simulation.
pub struct SimNode {
    inner: SimNodeInner,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create and start a node. The seed drives its message ids and jitter.
    pub fn new(uid: Uid, seed: u64, created_at: Timestamp) -> Result<Self, Error> {
        let mut inner = Node::new(
            SimRadio::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            uid,
        )?;
        // The simulated radio cannot fail its self test.
        let _ = inner.start();
        Ok(Self { inner, created_at })
    }

    pub fn uid(&self) -> Uid {
        self.inner.uid()
    }

    /// Get a reference to the inner node.
    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    /// Get a mutable reference to the inner node.
    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn is_transmitting(&self) -> bool {
        self.inner.state() == RadioState::Transmitting
    }

    pub fn neighbor_count(&self) -> usize {
        self.inner.neighbors().len()
    }

    /// Time on air of one frame with the node's preset.
    pub fn frame_airtime(&self) -> Duration {
        self.inner.frame_airtime()
    }

    /// Run one scheduler iteration at `now`.
    pub fn poll(&mut self, now: Timestamp) {
        // Update the clock so any code that reads clock.now() gets correct time
        self.inner.clock().set(now);
        self.inner.poll();
    }

    /// When the node next needs a poll.
    pub fn next_wake(&self, now: Timestamp) -> Timestamp {
        self.inner.next_wake(now)
    }

    /// Hand a frame to the radio. `false` if it was not listening.
    pub fn deliver(&self, frame: Vec<u8>, rssi: i16) -> bool {
        self.inner.radio().deliver(frame, rssi)
    }

    pub fn complete_tx(&self) {
        self.inner.radio().complete_tx();
    }

    /// Take all frames the node put on air.
    pub fn take_outgoing(&self) -> Vec<Vec<u8>> {
        self.inner.radio().take_sent()
    }

    /// Take all application events raised so far.
    pub fn take_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.events().try_receive() {
            events.push(event);
        }
        events
    }
}
