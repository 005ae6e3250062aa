//! Core traits for radio, time, and randomness abstraction.
//!
//! These traits allow the mesh core to be used with different:
//! - Radio drivers (SX127x/SX126x, simulation)
//! - Time sources (real hardware time, simulated time)
//! - Random number generators

use core::fmt::Debug;
use core::future::Future;

use embassy_sync::channel::Channel;

use crate::airtime::RangePreset;
use crate::queue::ChannelMutex;
use crate::time::Timestamp;
use crate::types::{Event, EVENT_QUEUE_SIZE, RADIO_EVENT_QUEUE_SIZE};

/// Largest frame a LoRa radio can hand back (FIFO size).
pub const MAX_FRAME_LEN: usize = 255;

/// What the radio interrupt reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    /// The frame passed to [`Radio::transmit`] has left the antenna.
    TxDone,
    /// A frame is waiting in the receive buffer.
    RxDone,
    /// Transmit or receive timed out in the driver.
    Timeout,
    /// CRC or header error, or any other driver fault.
    Error,
}

/// Interrupt-to-core event channel type.
pub type RadioEventChannel = Channel<ChannelMutex, RadioEvent, RADIO_EVENT_QUEUE_SIZE>;

/// Application event channel.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Half-duplex radio driver.
///
/// The core never blocks on the radio: every call returns immediately and
/// completions are reported through [`Radio::events`].
///
/// # Interrupt Safety
///
/// The event channel uses `CriticalSectionRawMutex`, so the DIO interrupt
/// handler may call `events().try_send()` directly. That is the only thing the
/// handler does; reading the buffer and every table update happen in the main
/// loop when it drains the channel.
///
/// # Usage Contract
///
/// - Radio ISR -> `radio.events().try_send(RadioEvent::RxDone)` (or `TxDone`, ...)
/// - Simulator -> same, when a frame is delivered or airtime elapses
/// - Node -> `radio.events().try_receive()` / `receive().await`
pub trait Radio {
    type Error: Debug;

    /// Startup check (version register, calibration). Run once before the loop.
    fn self_test(&mut self) -> Result<(), Self::Error>;

    /// Apply a modulation preset. Leaves the radio in standby.
    fn configure(&mut self, preset: RangePreset) -> Result<(), Self::Error>;

    /// Start sending `frame`. Completion is reported as [`RadioEvent::TxDone`].
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Listen until the next transmit or reconfiguration.
    fn enter_continuous_receive(&mut self) -> Result<(), Self::Error>;

    /// Copy the last received frame into `buf`.
    ///
    /// Returns the length the radio reported, which can exceed `buf.len()`
    /// for a malformed frame; only `buf.len()` bytes are written then.
    fn read_received_buffer(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// RSSI of the last received frame in dBm, or 0 if there is no valid sample.
    fn link_quality(&mut self) -> i16;

    /// Channel the interrupt handler pushes into.
    fn events(&self) -> &RadioEventChannel;
}

/// Time source trait for real or simulated time.
///
/// Allows the core to work with:
/// - Real hardware time (embassy_time, std::time)
/// - Simulated time (controlled by simulator for deterministic testing)
///
/// Must be monotonic: ack timeouts and uptime are measured with it.
///
/// # Example (testing with MockClock)
///
/// ```
/// use hopmesh::traits::test_impls::MockClock;
/// use hopmesh::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
///
/// clock.set(Timestamp::from_millis(5000));
/// assert_eq!(clock.now().as_millis(), 5000);
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait.
///
/// Used for:
/// - The first message id after boot
/// - Transmit jitter
pub trait Random {
    /// Generate a random u64 in the range [min, max). Returns `min` when the
    /// range is empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u32.
    fn gen_u32(&mut self) -> u32 {
        self.gen_range(0, u32::MAX as u64 + 1) as u32
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};
    use core::future::{ready, Ready};

    use super::*;

    /// Error returned by [`MockRadio`] when told to fail.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MockRadioError;

    /// Scriptable radio. Frames handed to `transmit` are recorded; frames
    /// injected with [`MockRadio::inject_rx`] are read back in order.
    pub struct MockRadio {
        events: RadioEventChannel,
        sent: RefCell<Vec<Vec<u8>>>,
        rx: RefCell<VecDeque<(Vec<u8>, i16)>>,
        last_rssi: Cell<i16>,
        preset: Cell<Option<RangePreset>>,
        receiving: Cell<bool>,
        receive_calls: Cell<usize>,
        fail_self_test: bool,
        fail_transmit: Cell<bool>,
    }

    impl Default for MockRadio {
        fn default() -> Self {
            Self {
                events: Channel::new(),
                sent: RefCell::new(Vec::new()),
                rx: RefCell::new(VecDeque::new()),
                last_rssi: Cell::new(0),
                preset: Cell::new(None),
                receiving: Cell::new(false),
                receive_calls: Cell::new(0),
                fail_self_test: false,
                fail_transmit: Cell::new(false),
            }
        }
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self::default()
        }

        /// A radio whose startup check fails.
        pub fn failing_self_test() -> Self {
            Self {
                fail_self_test: true,
                ..Self::default()
            }
        }

        /// Make subsequent `transmit` calls fail.
        pub fn set_fail_transmit(&self, fail: bool) {
            self.fail_transmit.set(fail);
        }

        /// Queue a frame as if it had been received and raise `RxDone`.
        pub fn inject_rx(&self, frame: Vec<u8>, rssi: i16) {
            self.rx.borrow_mut().push_back((frame, rssi));
            let _ = self.events.try_send(RadioEvent::RxDone);
        }

        /// Raise `TxDone` as the interrupt would once airtime has elapsed.
        pub fn complete_tx(&self) {
            let _ = self.events.try_send(RadioEvent::TxDone);
        }

        /// Raise an arbitrary event.
        pub fn raise(&self, event: RadioEvent) {
            let _ = self.events.try_send(event);
        }

        /// Take all transmitted frames, oldest first.
        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            core::mem::take(&mut *self.sent.borrow_mut())
        }

        pub fn sent_count(&self) -> usize {
            self.sent.borrow().len()
        }

        pub fn configured_preset(&self) -> Option<RangePreset> {
            self.preset.get()
        }

        pub fn is_receiving(&self) -> bool {
            self.receiving.get()
        }

        /// Number of `enter_continuous_receive` calls so far.
        pub fn receive_calls(&self) -> usize {
            self.receive_calls.get()
        }
    }

    impl Radio for MockRadio {
        type Error = MockRadioError;

        fn self_test(&mut self) -> Result<(), MockRadioError> {
            if self.fail_self_test {
                Err(MockRadioError)
            } else {
                Ok(())
            }
        }

        fn configure(&mut self, preset: RangePreset) -> Result<(), MockRadioError> {
            self.preset.set(Some(preset));
            self.receiving.set(false);
            Ok(())
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), MockRadioError> {
            if self.fail_transmit.get() {
                return Err(MockRadioError);
            }
            self.receiving.set(false);
            self.sent.borrow_mut().push(frame.to_vec());
            Ok(())
        }

        fn enter_continuous_receive(&mut self) -> Result<(), MockRadioError> {
            self.receiving.set(true);
            self.receive_calls.set(self.receive_calls.get() + 1);
            Ok(())
        }

        fn read_received_buffer(&mut self, buf: &mut [u8]) -> Result<usize, MockRadioError> {
            let Some((frame, rssi)) = self.rx.borrow_mut().pop_front() else {
                return Err(MockRadioError);
            };
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

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        /// Advance time to the given timestamp.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // In synchronous tests, sleep completes immediately.
            // The test code should advance time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }
}
