//! The message model: one fixed-size record per frame.
//!
//! A [`Message`] is a plain `Copy` value. It moves by value through the queues,
//! the history and the ack ledger; nothing holds a reference into another
//! table. The type-specific meaning of the three payload bytes is exposed as the
//! [`Content`] sum type so handlers match every type exhaustively.

use core::fmt;

use crate::types::PING_HOP_BUDGET;
use crate::uid::{Uid, BROADCAST};

/// Sequence number, scoped to the sending device.
pub type MessageId = u8;

/// Payload bytes carried by every message.
pub const PAYLOAD_LEN: usize = 3;

/// Largest hop budget the flags byte can carry.
pub const MAX_HOP_BUDGET: u8 = 7;

/// Message type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ack = 0,
    Hello = 1,
    Ping = 2,
    Pong = 3,
    Text = 4,
    Request = 5,
    Response = 6,
    Raw = 7,
}

impl MessageType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageType::Ack => "ACK",
            MessageType::Hello => "HELLO",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Text => "TEXT",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Raw => "RAW",
        }
    }
}

impl TryFrom<u8> for MessageType {
    /// The unrecognised type byte.
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => MessageType::Ack,
            1 => MessageType::Hello,
            2 => MessageType::Ping,
            3 => MessageType::Pong,
            4 => MessageType::Text,
            5 => MessageType::Request,
            6 => MessageType::Response,
            7 => MessageType::Raw,
            other => return Err(other),
        })
    }
}

/// Keys understood by REQUEST/RESPONSE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InfoKey {
    /// `major << 8 | minor`.
    Version = 0,
    /// Battery level as reported by the application.
    Battery = 1,
    /// Seconds since the node started, saturated to `u16`.
    Uptime = 2,
    /// Short numeric callsign set by the application.
    Callsign = 3,
}

impl TryFrom<u8> for InfoKey {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => InfoKey::Version,
            1 => InfoKey::Battery,
            2 => InfoKey::Uptime,
            3 => InfoKey::Callsign,
            other => return Err(other),
        })
    }
}

/// Canned phrases addressed by TEXT messages.
pub const CANNED_TEXT: [&str; 15] = [
    "OK",
    "NO",
    "Over",
    "Out",
    "Go ahead",
    "Stand-by",
    "Come in",
    "Copy",
    "Repeat",
    "Break, break",
    "SOS",
    "Good reception",
    "Bad reception",
    "Stay put",
    "Move",
];

/// Look up a canned phrase; ids past the table are unknown, not errors.
pub fn canned_text(id: u8) -> Option<&'static str> {
    CANNED_TEXT.get(id as usize).copied()
}

/// Ack request bit and hop budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    pub ack_requested: bool,
    hop_budget: u8,
}

impl Flags {
    /// No ack, no relaying.
    pub const NONE: Flags = Flags {
        ack_requested: false,
        hop_budget: 0,
    };

    /// Build flags; the hop budget is clamped to [`MAX_HOP_BUDGET`].
    pub const fn new(ack_requested: bool, hop_budget: u8) -> Self {
        let hop_budget = if hop_budget > MAX_HOP_BUDGET {
            MAX_HOP_BUDGET
        } else {
            hop_budget
        };
        Flags {
            ack_requested,
            hop_budget,
        }
    }

    pub const fn hop_budget(&self) -> u8 {
        self.hop_budget
    }
}

/// One frame's worth of protocol state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    pub dst: Uid,
    pub src: Uid,
    pub id: MessageId,
    pub kind: MessageType,
    pub flags: Flags,
    pub payload: [u8; PAYLOAD_LEN],
    /// Sender clock in milliseconds; only PING and PONG fill it in.
    pub timestamp: u32,
}

/// Typed view of a message's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Content {
    Ack { acked: MessageId },
    Hello,
    Ping { sent_at: u32 },
    Pong { echo: u32 },
    /// Index into [`CANNED_TEXT`]; may be out of range.
    Text { text_id: u8 },
    /// `Err` holds an unknown key byte.
    Request { key: Result<InfoKey, u8> },
    Response { key: Result<InfoKey, u8>, value: u16 },
    Raw { data: [u8; PAYLOAD_LEN] },
}

impl Message {
    fn build(
        src: Uid,
        dst: Uid,
        id: MessageId,
        kind: MessageType,
        flags: Flags,
        payload: [u8; PAYLOAD_LEN],
    ) -> Self {
        Self {
            dst,
            src,
            id,
            kind,
            flags,
            payload,
            timestamp: 0,
        }
    }

    /// Acknowledge message `acked` previously received from `dst`.
    pub fn ack(src: Uid, dst: Uid, id: MessageId, acked: MessageId) -> Self {
        Self::build(src, dst, id, MessageType::Ack, Flags::NONE, [acked, 0, 0])
    }

    /// Presence announcement to every device in range.
    pub fn hello(src: Uid, id: MessageId, ack_requested: bool) -> Self {
        Self::build(
            src,
            BROADCAST,
            id,
            MessageType::Hello,
            Flags::new(ack_requested, 0),
            [0; PAYLOAD_LEN],
        )
    }

    /// Latency check. The only message created with a non-zero hop budget.
    pub fn ping(src: Uid, dst: Uid, id: MessageId, sent_at: u32) -> Self {
        let mut msg = Self::build(
            src,
            dst,
            id,
            MessageType::Ping,
            Flags::new(false, PING_HOP_BUDGET),
            [0; PAYLOAD_LEN],
        );
        msg.timestamp = sent_at;
        msg
    }

    /// Reply to a ping, echoing its timestamp.
    pub fn pong(src: Uid, dst: Uid, id: MessageId, echo: u32) -> Self {
        let mut msg = Self::build(src, dst, id, MessageType::Pong, Flags::NONE, [0; PAYLOAD_LEN]);
        msg.timestamp = echo;
        msg
    }

    pub fn text(src: Uid, dst: Uid, id: MessageId, text_id: u8) -> Self {
        Self::build(src, dst, id, MessageType::Text, Flags::NONE, [text_id, 0, 0])
    }

    pub fn request(src: Uid, dst: Uid, id: MessageId, key: InfoKey) -> Self {
        Self::build(src, dst, id, MessageType::Request, Flags::NONE, [key as u8, 0, 0])
    }

    /// `value` travels big-endian after the key byte.
    pub fn response(src: Uid, dst: Uid, id: MessageId, key: InfoKey, value: u16) -> Self {
        let [hi, lo] = value.to_be_bytes();
        Self::build(src, dst, id, MessageType::Response, Flags::NONE, [key as u8, hi, lo])
    }

    pub fn raw(src: Uid, dst: Uid, id: MessageId, data: [u8; PAYLOAD_LEN]) -> Self {
        Self::build(src, dst, id, MessageType::Raw, Flags::NONE, data)
    }

    /// Same message with the ack bit set or cleared.
    pub fn with_ack_requested(mut self, ack_requested: bool) -> Self {
        self.flags.ack_requested = ack_requested;
        self
    }

    /// Same message with a different (clamped) hop budget.
    pub fn with_hop_budget(mut self, hop_budget: u8) -> Self {
        self.flags = Flags::new(self.flags.ack_requested, hop_budget);
        self
    }

    pub fn ack_requested(&self) -> bool {
        self.flags.ack_requested
    }

    pub fn hop_budget(&self) -> u8 {
        self.flags.hop_budget()
    }

    /// Copy to put back on air one hop further, or `None` when the budget is spent.
    pub fn relayed(&self) -> Option<Message> {
        let remaining = self.flags.hop_budget.checked_sub(1)?;
        Some(self.with_hop_budget(remaining))
    }

    /// Dedup identity. `id` is only unique per source.
    pub fn key(&self) -> (Uid, MessageId) {
        (self.src, self.id)
    }

    pub fn content(&self) -> Content {
        let p = self.payload;
        match self.kind {
            MessageType::Ack => Content::Ack { acked: p[0] },
            MessageType::Hello => Content::Hello,
            MessageType::Ping => Content::Ping {
                sent_at: self.timestamp,
            },
            MessageType::Pong => Content::Pong {
                echo: self.timestamp,
            },
            MessageType::Text => Content::Text { text_id: p[0] },
            MessageType::Request => Content::Request {
                key: InfoKey::try_from(p[0]),
            },
            MessageType::Response => Content::Response {
                key: InfoKey::try_from(p[0]),
                value: u16::from_be_bytes([p[1], p[2]]),
            },
            MessageType::Raw => Content::Raw { data: p },
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} {} -> {}",
            self.kind.name(),
            self.id,
            self.src,
            self.dst
        )?;
        if self.ack_requested() {
            write!(f, " ack")?;
        }
        if self.hop_budget() > 0 {
            write!(f, " hops={}", self.hop_budget())?;
        }
        Ok(())
    }
}

/// Per-boot message id counter.
///
/// Starts from a random value so a rebooted node does not immediately reuse
/// ids that neighbours still hold in their dedup history.
#[derive(Clone, Debug)]
pub struct MessageIds {
    next: MessageId,
}

impl MessageIds {
    pub fn starting_at(first: MessageId) -> Self {
        Self { next: first }
    }

    /// Hand out the next id, wrapping modulo 256.
    pub fn next_id(&mut self) -> MessageId {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}
