//! Wire format.
//!
//! Every frame is exactly [`MESSAGE_WIRE_SIZE`] bytes; the radio reports the
//! length out of band, so there is no length prefix.
//!
//! ```text
//! dst (3) || src (3) || id (1) || type (1) || flags (1) || reserved (1)
//! || payload (3) || timestamp (4, big-endian)
//!
//! flags byte:
//! - bit 0: ack requested
//! - bits 1-3: hop budget (0-7)
//! - bits 4-7: reserved, written as zero, ignored on read
//! ```
//!
//! The reserved byte is written as zero and ignored on read.

use alloc::vec::Vec;

use crate::message::{Flags, Message, MessageType, PAYLOAD_LEN};
use crate::uid::{Uid, UID_LEN};

/// Size of an encoded [`Message`].
pub const MESSAGE_WIRE_SIZE: usize = 2 * UID_LEN + 4 + PAYLOAD_LEN + 4;

const FLAG_ACK_REQUESTED: u8 = 0b0000_0001;
const HOP_BUDGET_SHIFT: u8 = 1;
const HOP_BUDGET_MASK: u8 = 0b0000_1110;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before the frame did.
    UnexpectedEof,
    /// Bytes left over after a complete frame.
    InvalidLength,
    /// Type byte outside the known set.
    UnknownType(u8),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "frame truncated"),
            DecodeError::InvalidLength => write!(f, "frame has trailing bytes"),
            DecodeError::UnknownType(t) => write!(f, "unknown message type {}", t),
        }
    }
}

/// Cursor over a received buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_uid(&mut self) -> Result<Uid, DecodeError> {
        Ok(Uid(self.read_array()?))
    }
}

/// Growable output buffer.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_uid(&mut self, uid: &Uid) {
        self.write_bytes(uid.bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Types that can be written in wire format.
pub trait Encode {
    fn encode(&self, w: &mut Writer);

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Types that can be read from wire format.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode a whole buffer; trailing bytes are an error.
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let value = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(value)
    }
}

impl Flags {
    pub(crate) fn to_wire(self) -> u8 {
        let mut byte = (self.hop_budget() << HOP_BUDGET_SHIFT) & HOP_BUDGET_MASK;
        if self.ack_requested {
            byte |= FLAG_ACK_REQUESTED;
        }
        byte
    }

    pub(crate) fn from_wire(byte: u8) -> Self {
        Flags::new(
            byte & FLAG_ACK_REQUESTED != 0,
            (byte & HOP_BUDGET_MASK) >> HOP_BUDGET_SHIFT,
        )
    }
}

impl Encode for Message {
    fn encode(&self, w: &mut Writer) {
        w.write_uid(&self.dst);
        w.write_uid(&self.src);
        w.write_u8(self.id);
        w.write_u8(self.kind.as_u8());
        w.write_u8(self.flags.to_wire());
        w.write_u8(0);
        w.write_bytes(&self.payload);
        w.write_u32_be(self.timestamp);
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(MESSAGE_WIRE_SIZE);
        self.encode(&mut w);
        w.finish()
    }
}

impl Decode for Message {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let dst = r.read_uid()?;
        let src = r.read_uid()?;
        let id = r.read_u8()?;
        let kind = r.read_u8()?;
        let flags = Flags::from_wire(r.read_u8()?);
        let _reserved = r.read_u8()?;
        let payload = r.read_array::<PAYLOAD_LEN>()?;
        let timestamp = r.read_u32_be()?;

        // Check the type last so a truncated frame reports EOF first.
        let kind = MessageType::try_from(kind).map_err(DecodeError::UnknownType)?;

        Ok(Message {
            dst,
            src,
            id,
            kind,
            flags,
            payload,
            timestamp,
        })
    }
}
