//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use hopmesh::{InfoKey, Message, RangePreset, Timestamp, Uid};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Something a user does on a handheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Hello { ack: bool },
    Ping { dst: Uid },
    Text { dst: Uid, text_id: u8, ack: bool },
    Request { dst: Uid, key: InfoKey, ack: bool },
    /// Queue a hand-built message as is.
    Send(Message),
    SetRange(RangePreset),
    Pause(bool),
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<Uid>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    DisableLink { from: Uid, to: Uid },
    EnableLink { from: Uid, to: Uid },
    SetLossRate { from: Uid, to: Uid, rate: f64 },
    /// Record every node's counters.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame finished arriving at `to`.
    FrameArrival {
        to: Uid,
        frame: Vec<u8>,
        rssi: i16,
        from: Uid,
    },
    /// The frame `node` keyed has left the antenna.
    TxDone { node: Uid },
    /// Poll a node whose scheduler asked to be woken.
    Wake { node: Uid },
    /// A user command on one handheld.
    Command { node: Uid, command: Command },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Implement ordering for min-heap (BinaryHeap is max-heap, so we reverse).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earlier time first, then lower sequence number.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: Uid = Uid::new([1, 2, 3]);

    #[test]
    fn test_earlier_event_first() {
        let late = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            Event::Wake { node: N },
        );
        let early = ScheduledEvent::new(
            Timestamp::from_secs(5),
            SequenceNumber::new(2),
            Event::TxDone { node: N },
        );
        assert!(early > late);
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        let first = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            Event::Wake { node: N },
        );
        let second = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(2),
            Event::Wake { node: N },
        );
        assert!(first > second);
    }
}
