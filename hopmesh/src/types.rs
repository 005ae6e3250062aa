//! Shared constants, errors, application events and counters.

use core::convert::Infallible;
use core::fmt;

use crate::message::{InfoKey, MessageId};
use crate::time::Duration;
use crate::uid::Uid;

// Protocol version answered to InfoKey::Version.
pub const PROTOCOL_VERSION_MAJOR: u8 = 0;
pub const PROTOCOL_VERSION_MINOR: u8 = 1;

/// Flood radius given to new PING messages.
pub const PING_HOP_BUDGET: u8 = 3;

// Queue sizes (these size embassy-sync channels, so they are not in NodeConfig).
pub const MESSAGE_QUEUE_SIZE: usize = 8;
pub const RADIO_EVENT_QUEUE_SIZE: usize = 8;
pub const EVENT_QUEUE_SIZE: usize = 16;

// Timing, in multiples of one frame's time on air.
pub const ACK_TIMEOUT_AIRTIMES: u64 = 8;
pub const JITTER_AIRTIMES: u64 = 2;
pub const MIN_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on how long `run()` sleeps with nothing scheduled.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `major << 8 | minor`, as carried in a version RESPONSE.
pub const fn protocol_version() -> u16 {
    ((PROTOCOL_VERSION_MAJOR as u16) << 8) | PROTOCOL_VERSION_MINOR as u16
}

/// Error type for node operations.
///
/// Tables that never touch the radio return `Error` (that is,
/// `Error<Infallible>`); [`Error::widen`] lifts those into the node's
/// `Error<R::Error>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error<E = Infallible> {
    /// Driver call failed.
    Radio(E),
    /// Radio failed its startup check.
    SelfTestFailed,
    /// Bounded queue is full; the message was dropped.
    QueueFull,
    /// Every ack ledger slot is busy.
    LedgerFull,
    /// Neighbour table is full; the new peer was not recorded.
    NeighborTableFull,
    /// Transmit-complete reported while nothing was on air.
    UnexpectedTxDone,
    /// Received buffer is not a valid frame.
    InvalidMessage,
    /// The broadcast address was given as a device address.
    BroadcastAddress,
}

impl Error<Infallible> {
    /// Reuse a radio-independent error in a radio-specific context.
    pub fn widen<E>(self) -> Error<E> {
        match self {
            Error::Radio(never) => match never {},
            Error::SelfTestFailed => Error::SelfTestFailed,
            Error::QueueFull => Error::QueueFull,
            Error::LedgerFull => Error::LedgerFull,
            Error::NeighborTableFull => Error::NeighborTableFull,
            Error::UnexpectedTxDone => Error::UnexpectedTxDone,
            Error::InvalidMessage => Error::InvalidMessage,
            Error::BroadcastAddress => Error::BroadcastAddress,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Radio(e) => write!(f, "radio error: {:?}", e),
            Error::SelfTestFailed => write!(f, "radio self test failed"),
            Error::QueueFull => write!(f, "queue full"),
            Error::LedgerFull => write!(f, "ack ledger full"),
            Error::NeighborTableFull => write!(f, "neighbour table full"),
            Error::UnexpectedTxDone => write!(f, "transmit complete while not transmitting"),
            Error::InvalidMessage => write!(f, "invalid message"),
            Error::BroadcastAddress => write!(f, "broadcast address used as device address"),
        }
    }
}

/// What the node hands to the UI layer after delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A peer announced itself.
    Hello { from: Uid },
    /// A message we sent with an ack request was acknowledged.
    Acked { from: Uid, id: MessageId },
    /// Round trip to `from` measured from a PONG.
    Pong { from: Uid, rtt: Duration },
    /// Canned text; `text` is `None` for ids this firmware does not know.
    Text {
        from: Uid,
        text_id: u8,
        text: Option<&'static str>,
    },
    /// A peer asked for one of our values (already answered).
    InfoRequested { from: Uid, key: InfoKey },
    InfoResponse { from: Uid, key: InfoKey, value: u16 },
    Raw { from: Uid, data: [u8; 3] },
    /// All retries spent without an ACK.
    DeliveryFailed { to: Uid, id: MessageId },
}

/// Running counters, readable from the console and the simulator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Frames handed to the radio (relays and retries included).
    pub transmitted: u64,
    /// Frames read from the radio.
    pub received: u64,
    /// Frames put back on air for another device.
    pub relayed: u64,
    /// Messages passed to the type handlers.
    pub delivered: u64,
    /// Messages recognised by the dedup history.
    pub duplicates: u64,
    /// Messages dropped because a queue was full.
    pub queue_drops: u64,
    pub retransmissions: u64,
    pub delivery_failures: u64,
    /// Frames that did not decode.
    pub decode_errors: u64,
    /// Driver reports that did not fit the current state.
    pub anomalies: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            transmitted: 0,
            received: 0,
            relayed: 0,
            delivered: 0,
            duplicates: 0,
            queue_drops: 0,
            retransmissions: 0,
            delivery_failures: 0,
            decode_errors: 0,
            anomalies: 0,
        }
    }
}
