//! Recently heard peers.
//!
//! A bounded table keyed by [`Uid`]. Entries are updated in place or appended;
//! once the table is full new peers are refused until the node restarts. Nothing
//! is expired: callers judge staleness from [`Neighbor::age`].

use alloc::vec::Vec;

use crate::time::{Duration, Timestamp};
use crate::types::Error;
use crate::uid::Uid;

/// What we know about one peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Neighbor {
    pub uid: Uid,
    /// Last valid link-quality sample in dBm.
    pub rssi: Option<i16>,
    /// Protocol version, once the peer has answered a version request.
    pub version: Option<u16>,
    pub last_seen: Timestamp,
}

impl Neighbor {
    /// Time since the peer was last heard.
    pub fn age(&self, now: Timestamp) -> Duration {
        now.saturating_sub(self.last_seen)
    }
}

/// Fixed-capacity neighbour table.
#[derive(Debug)]
pub struct NeighborTable {
    entries: Vec<Neighbor>,
    capacity: usize,
}

impl NeighborTable {
    /// Allocate the table up front; it never grows past `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Record that `uid` was heard at `now`.
    ///
    /// A zero or missing `rssi` sample leaves the stored strength alone; a
    /// missing `version` keeps the known one. Returns
    /// [`Error::NeighborTableFull`] for a new peer when there is no room; the
    /// existing entries are untouched.
    pub fn update_or_insert(
        &mut self,
        uid: Uid,
        rssi: Option<i16>,
        version: Option<u16>,
        now: Timestamp,
    ) -> Result<(), Error> {
        let rssi = rssi.filter(|&r| r != 0);

        if let Some(entry) = self.entries.iter_mut().find(|n| n.uid == uid) {
            if rssi.is_some() {
                entry.rssi = rssi;
            }
            if version.is_some() {
                entry.version = version;
            }
            entry.last_seen = now;
            log::debug!("neighbour {} updated (rssi {:?})", uid, entry.rssi);
            return Ok(());
        }

        if self.is_full() {
            log::warn!("neighbour table full, {} not recorded", uid);
            return Err(Error::NeighborTableFull);
        }

        self.entries.push(Neighbor {
            uid,
            rssi,
            version,
            last_seen: now,
        });
        log::debug!("neighbour {} added (rssi {:?})", uid, rssi);
        Ok(())
    }

    pub fn get(&self, uid: &Uid) -> Option<&Neighbor> {
        self.entries.iter().find(|n| n.uid == *uid)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u8) -> Uid {
        Uid::new([0x10, 0x00, n])
    }

    #[test]
    fn test_insert_then_update_in_place() {
        let mut table = NeighborTable::with_capacity(4);
        table
            .update_or_insert(uid(1), Some(-80), None, Timestamp::from_secs(1))
            .unwrap();
        table
            .update_or_insert(uid(1), Some(-60), None, Timestamp::from_secs(5))
            .unwrap();

        assert_eq!(table.len(), 1);
        let n = table.get(&uid(1)).unwrap();
        assert_eq!(n.rssi, Some(-60));
        assert_eq!(n.last_seen, Timestamp::from_secs(5));
    }

    #[test]
    fn test_invalid_sample_keeps_previous_strength() {
        let mut table = NeighborTable::with_capacity(4);
        table
            .update_or_insert(uid(1), Some(-70), None, Timestamp::from_secs(1))
            .unwrap();
        table
            .update_or_insert(uid(1), Some(0), None, Timestamp::from_secs(2))
            .unwrap();
        table
            .update_or_insert(uid(1), None, Some(0x0001), Timestamp::from_secs(3))
            .unwrap();

        let n = table.get(&uid(1)).unwrap();
        assert_eq!(n.rssi, Some(-70));
        assert_eq!(n.version, Some(0x0001));
        assert_eq!(n.last_seen, Timestamp::from_secs(3));
    }

    #[test]
    fn test_saturation_rejects_new_peers_only() {
        let mut table = NeighborTable::with_capacity(3);
        for n in 0..3 {
            table
                .update_or_insert(uid(n), Some(-50 - n as i16), None, Timestamp::from_secs(1))
                .unwrap();
        }
        assert!(table.is_full());

        for n in 3..6 {
            assert_eq!(
                table.update_or_insert(uid(n), Some(-40), None, Timestamp::from_secs(2)),
                Err(Error::NeighborTableFull)
            );
        }
        assert_eq!(table.len(), 3);
        assert!(table.get(&uid(4)).is_none());

        // Existing entries are intact and still updatable.
        assert_eq!(table.get(&uid(2)).unwrap().rssi, Some(-52));
        assert_eq!(table.get(&uid(2)).unwrap().last_seen, Timestamp::from_secs(1));
        table
            .update_or_insert(uid(2), Some(-45), None, Timestamp::from_secs(3))
            .unwrap();
        assert_eq!(table.get(&uid(2)).unwrap().rssi, Some(-45));
    }

    #[test]
    fn test_age_is_elapsed_time() {
        let mut table = NeighborTable::with_capacity(1);
        table
            .update_or_insert(uid(9), None, None, Timestamp::from_secs(10))
            .unwrap();
        let n = table.iter().next().unwrap();
        assert_eq!(n.rssi, None);
        assert_eq!(n.age(Timestamp::from_secs(42)), Duration::from_secs(32));
        assert_eq!(n.age(Timestamp::from_secs(1)), Duration::ZERO);
    }
}
