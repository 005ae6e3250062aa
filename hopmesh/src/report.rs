//! Console listings of the node's tables.
//!
//! Plain text, one line per entry, addresses as `XX:XX:XX` and ages in whole
//! seconds.

use alloc::string::String;
use core::fmt::Write;

use crate::ack::AckLedger;
use crate::history::MessageHistory;
use crate::neighbor::NeighborTable;
use crate::time::Timestamp;

/// One line per neighbour: address, RSSI, protocol version, seconds since last heard.
pub fn neighbors(table: &NeighborTable, now: Timestamp) -> String {
    let mut out = String::new();
    if table.is_empty() {
        out.push_str("no neighbours\n");
        return out;
    }
    for n in table.iter() {
        let _ = write!(out, "{}", n.uid);
        match n.rssi {
            Some(rssi) => {
                let _ = write!(out, "  rssi {:>4}", rssi);
            }
            None => out.push_str("  rssi    -"),
        }
        match n.version {
            Some(v) => {
                let _ = write!(out, "  v{}.{}", v >> 8, v & 0xFF);
            }
            None => out.push_str("  v?"),
        }
        let _ = writeln!(out, "  {}s ago", n.age(now).as_secs());
    }
    out
}

/// Recently processed messages, oldest first.
pub fn history(history: &MessageHistory, now: Timestamp) -> String {
    let mut out = String::new();
    if history.is_empty() {
        out.push_str("no messages\n");
        return out;
    }
    for entry in history.iter() {
        let age = now.saturating_sub(entry.received_at).as_secs();
        let _ = writeln!(out, "{:>4}s ago  {}", age, entry.message);
    }
    out
}

/// Messages still waiting for an ACK, next retry first.
pub fn pending_acks(ledger: &AckLedger, now: Timestamp) -> String {
    let mut out = String::new();
    let pending = ledger.pending();
    if pending.is_empty() {
        out.push_str("no pending acks\n");
        return out;
    }
    for entry in pending {
        let due = entry.deadline.saturating_sub(now).as_millis();
        let _ = writeln!(
            out,
            "{}  retries left {}  next in {} ms",
            entry.message, entry.retries_remaining, due
        );
    }
    out
}
