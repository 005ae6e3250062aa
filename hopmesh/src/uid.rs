//! Device addressing.
//!
//! A [`Uid`] is three bytes, written `XX:XX:XX` in upper-case hex. The all-ones
//! value is the broadcast address and is never assigned to a device.

use core::fmt;
use core::str::FromStr;

/// Length of a device address on the wire.
pub const UID_LEN: usize = 3;

/// 3-byte device address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uid(pub [u8; UID_LEN]);

/// Reserved destination meaning "every device in range".
pub const BROADCAST: Uid = Uid([0xFF; UID_LEN]);

impl Uid {
    pub const fn new(bytes: [u8; UID_LEN]) -> Self {
        Uid(bytes)
    }

    /// Derive a device address from the board's unique hardware id.
    ///
    /// Uses the last three bytes of `hardware_id`. Returns `None` if the id is
    /// shorter than three bytes or the derived value collides with [`BROADCAST`].
    pub fn from_hardware_id(hardware_id: &[u8]) -> Option<Self> {
        let start = hardware_id.len().checked_sub(UID_LEN)?;
        let mut bytes = [0u8; UID_LEN];
        bytes.copy_from_slice(&hardware_id[start..]);
        let uid = Uid(bytes);
        if uid.is_broadcast() {
            return None;
        }
        Some(uid)
    }

    pub const fn broadcast() -> Self {
        BROADCAST
    }

    pub const fn bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST
    }
}

impl From<[u8; UID_LEN]> for Uid {
    fn from(bytes: [u8; UID_LEN]) -> Self {
        Uid(bytes)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}:{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self)
    }
}

/// Why a console string is not an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseUidError {
    /// Not three colon-separated groups.
    WrongGroupCount,
    /// A group is not exactly two hex digits.
    InvalidGroup,
}

impl fmt::Display for ParseUidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseUidError::WrongGroupCount => write!(f, "expected XX:XX:XX"),
            ParseUidError::InvalidGroup => write!(f, "address groups must be two hex digits"),
        }
    }
}

impl FromStr for Uid {
    type Err = ParseUidError;

    /// Parse `XX:XX:XX` (either case). The literal `broadcast` is also accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("broadcast") {
            return Ok(BROADCAST);
        }

        let mut bytes = [0u8; UID_LEN];
        let mut groups = s.split(':');
        for byte in bytes.iter_mut() {
            let group = groups.next().ok_or(ParseUidError::WrongGroupCount)?;
            if group.len() != 2 || !group.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(ParseUidError::InvalidGroup);
            }
            *byte = u8::from_str_radix(group, 16).map_err(|_| ParseUidError::InvalidGroup)?;
        }
        if groups.next().is_some() {
            return Err(ParseUidError::WrongGroupCount);
        }
        Ok(Uid(bytes))
    }
}
