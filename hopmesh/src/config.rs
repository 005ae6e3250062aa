//! Compile-time table sizes.
//!
//! Every table is allocated once when the node is created and never grows past
//! these bounds. Pick a config to match the target's RAM.
//!
//! | Config | Neighbours | History | Pending acks | Retries |
//! |--------|-----------:|--------:|-------------:|--------:|
//! | `DefaultConfig` | 16 | 16 | 8 | 5 |
//! | `SmallConfig` | 8 | 8 | 4 | 3 |
//!
//! The relay history used by the forwarding decision has the same size as the
//! delivery history.
//!
//! # Example
//!
//! ```ignore
//! use hopmesh::{Node, NodeConfig, SmallConfig};
//!
//! let node = Node::<_, _, _, SmallConfig>::new(radio, random, clock, uid);
//!
//! struct Handheld;
//! impl NodeConfig for Handheld {
//!     const MAX_NEIGHBORS: usize = 32;
//!     const MAX_HISTORY: usize = 32;
//!     const MAX_PENDING_ACKS: usize = 8;
//!     const ACK_RETRIES: u8 = 5;
//! }
//! ```

/// Table bounds for a node. All values must be non-zero.
pub trait NodeConfig {
    /// Neighbour table capacity.
    const MAX_NEIGHBORS: usize;

    /// Slots in the cyclic dedup history.
    const MAX_HISTORY: usize;

    /// Messages that may wait for an ACK at the same time.
    const MAX_PENDING_ACKS: usize;

    /// Retransmissions attempted before an unacknowledged message is given up.
    const ACK_RETRIES: u8;
}

/// Sizes used by the handheld firmware.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const MAX_NEIGHBORS: usize = 16;
    const MAX_HISTORY: usize = 16;
    const MAX_PENDING_ACKS: usize = 8;
    const ACK_RETRIES: u8 = 5;
}

/// Halved tables for constrained parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl NodeConfig for SmallConfig {
    const MAX_NEIGHBORS: usize = 8;
    const MAX_HISTORY: usize = 8;
    const MAX_PENDING_ACKS: usize = 4;
    const ACK_RETRIES: u8 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(DefaultConfig::MAX_NEIGHBORS, 16);
        assert_eq!(DefaultConfig::MAX_HISTORY, 16);
        assert_eq!(DefaultConfig::MAX_PENDING_ACKS, 8);
        assert_eq!(DefaultConfig::ACK_RETRIES, 5);
    }

    #[test]
    fn test_small_config_not_larger_than_default() {
        assert!(SmallConfig::MAX_NEIGHBORS < DefaultConfig::MAX_NEIGHBORS);
        assert!(SmallConfig::MAX_HISTORY < DefaultConfig::MAX_HISTORY);
        assert!(SmallConfig::MAX_PENDING_ACKS < DefaultConfig::MAX_PENDING_ACKS);
        assert!(SmallConfig::ACK_RETRIES <= DefaultConfig::ACK_RETRIES);
    }

    #[test]
    fn test_configs_are_nonzero() {
        assert!(DefaultConfig::MAX_NEIGHBORS > 0);
        assert!(DefaultConfig::MAX_HISTORY > 0);
        assert!(DefaultConfig::MAX_PENDING_ACKS > 0);
        assert!(DefaultConfig::ACK_RETRIES > 0);

        assert!(SmallConfig::MAX_NEIGHBORS > 0);
        assert!(SmallConfig::MAX_HISTORY > 0);
        assert!(SmallConfig::MAX_PENDING_ACKS > 0);
        assert!(SmallConfig::ACK_RETRIES > 0);
    }
}
