//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use hopmesh::{Event, Metrics, Timestamp, Uid};

/// Every node's counters at one point in time.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    pub time: Timestamp,
    pub counters: HashMap<Uid, Metrics>,
    pub neighbor_counts: HashMap<Uid, usize>,
    pub pending_acks: HashMap<Uid, usize>,
}

impl NetworkSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            counters: HashMap::new(),
            neighbor_counts: HashMap::new(),
            pending_acks: HashMap::new(),
        }
    }

    pub fn record_node(&mut self, uid: Uid, counters: Metrics, neighbors: usize, pending_acks: usize) {
        self.counters.insert(uid, counters);
        self.neighbor_counts.insert(uid, neighbors);
        self.pending_acks.insert(uid, pending_acks);
    }

    /// Sum of one counter over all nodes.
    pub fn total(&self, counter: impl Fn(&Metrics) -> u64) -> u64 {
        self.counters.values().map(counter).sum()
    }

    /// No node is waiting for an ACK.
    pub fn settled(&self) -> bool {
        self.pending_acks.values().all(|&n| n == 0)
    }
}

/// An application event raised by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub time: Timestamp,
    pub node: Uid,
    pub event: Event,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames put on air.
    pub frames_sent: u64,
    /// Frames a listening radio accepted.
    pub frames_delivered: u64,
    /// Frames lost to the link loss rate.
    pub frames_lost: u64,
    /// Frames that arrived while the receiver was keyed.
    pub half_duplex_drops: u64,
    /// Application events from every node, in order.
    pub events: Vec<LoggedEvent>,
    pub snapshots: Vec<NetworkSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: NetworkSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&NetworkSnapshot> {
        self.snapshots.last()
    }

    /// Events raised by `node`, oldest first.
    pub fn events_at(&self, node: Uid) -> impl Iterator<Item = &LoggedEvent> {
        self.events.iter().filter(move |e| e.node == node)
    }

    /// Count events anywhere in the network matching `pred`.
    pub fn count_events(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.event)).count()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Counters of `node` at the end of the run.
    pub fn final_counters(&self, node: Uid) -> Option<&Metrics> {
        self.metrics
            .latest_snapshot()
            .and_then(|s| s.counters.get(&node))
    }

    /// Nobody is still waiting for an ACK at the end of the run.
    pub fn settled(&self) -> bool {
        self.metrics.latest_snapshot().is_some_and(|s| s.settled())
    }
}
