//! Discrete event simulator for hopmesh networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use hopmesh::{Duration, Error, Timestamp, Uid};

use crate::event::{Command, Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{LoggedEvent, NetworkSnapshot, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Polls in a row before a busy node is pushed to the next millisecond.
const MAX_POLLS_PER_WAKE: usize = 32;

/// Discrete event simulator for hopmesh networks.
///
/// Nodes are polled whenever something happens to them (a frame arrives,
/// their transmission ends, a command is issued) and whenever their scheduler
/// asks to be woken. A frame reaches every active neighbour one time on air
/// after it was keyed, plus the link delay.
pub struct Simulator {
    nodes: HashMap<Uid, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    seed: u64,
    /// RNG state for frame loss.
    rng_state: u64,
    /// Earliest pending wake-up per node.
    wakes: HashMap<Uid, Timestamp>,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            seed,
            rng_state: seed,
            wakes: HashMap::new(),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record every node's counters at this interval.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add and start a node.
    pub fn add_node(&mut self, uid: Uid) -> Result<Uid, Error> {
        let [a, b, c] = *uid.bytes();
        let seed = self
            .seed
            .wrapping_mul(31)
            .wrapping_add(u64::from_be_bytes([0, 0, 0, 0, 0, a, b, c]));
        self.nodes.insert(uid, SimNode::new(uid, seed, self.current_time)?);
        self.service(uid);
        Ok(uid)
    }

    pub fn node(&self, uid: &Uid) -> Option<&SimNode> {
        self.nodes.get(uid)
    }

    pub fn node_mut(&mut self, uid: &Uid) -> Option<&mut SimNode> {
        self.nodes.get_mut(uid)
    }

    /// All node addresses, sorted.
    pub fn node_ids(&self) -> Vec<Uid> {
        let mut ids: Vec<Uid> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    /// Issue a user command on `node` at `time`.
    pub fn command(&mut self, time: Timestamp, node: Uid, command: Command) {
        self.schedule(time, Event::Command { node, command });
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(event) = self.event_queue.peek() {
            if event.time > end_time {
                break;
            }
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Process at most `max_events` events.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        for _ in 0..max_events {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::FrameArrival {
                to,
                frame,
                rssi,
                from: _,
            } => self.arrive(to, frame, rssi),
            Event::TxDone { node } => {
                if let Some(n) = self.nodes.get(&node) {
                    n.complete_tx();
                }
                self.service(node);
            }
            Event::Wake { node } => {
                if self.wakes.get(&node) == Some(&self.current_time) {
                    self.wakes.remove(&node);
                }
                self.service(node);
            }
            Event::Command { node, command } => self.execute_command(node, command),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn arrive(&mut self, to: Uid, frame: Vec<u8>, rssi: i16) {
        let Some(node) = self.nodes.get(&to) else {
            return;
        };
        if node.deliver(frame, rssi) {
            self.metrics.frames_delivered += 1;
            self.service(to);
        } else {
            log::debug!("{} not listening, frame lost", to);
            self.metrics.half_duplex_drops += 1;
        }
    }

    fn execute_command(&mut self, uid: Uid, command: Command) {
        let Some(node) = self.nodes.get_mut(&uid) else {
            return;
        };
        node.inner().clock().set(self.current_time);
        let node = node.inner_mut();
        let result = match command {
            Command::Hello { ack } => node.send_hello(ack).map(drop).map_err(|e| e.to_string()),
            Command::Ping { dst } => node.send_ping(dst).map(drop).map_err(|e| e.to_string()),
            Command::Text { dst, text_id, ack } => node
                .send_text(dst, text_id, ack)
                .map(drop)
                .map_err(|e| e.to_string()),
            Command::Request { dst, key, ack } => node
                .send_request(dst, key, ack)
                .map(drop)
                .map_err(|e| e.to_string()),
            Command::Send(message) => node.enqueue(message).map(drop).map_err(|e| e.to_string()),
            Command::SetRange(preset) => node.set_range(preset).map_err(|e| e.to_string()),
            Command::Pause(paused) => {
                node.set_paused(paused);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::warn!("{}: {:?} failed: {}", uid, command, e);
        }
        self.service(uid);
    }

    /// Poll a node until it has nothing more to do right now, put its frames
    /// on air, and schedule its next wake-up.
    fn service(&mut self, uid: Uid) {
        let now = self.current_time;
        let mut wake = now;
        for _ in 0..MAX_POLLS_PER_WAKE {
            let Some(node) = self.nodes.get_mut(&uid) else {
                return;
            };
            node.poll(now);
            let frames = node.take_outgoing();
            let airtime = node.frame_airtime();
            for event in node.take_events() {
                self.metrics.events.push(LoggedEvent {
                    time: now,
                    node: uid,
                    event,
                });
            }
            wake = node.next_wake(now);

            for frame in frames {
                self.transmit(uid, frame, airtime);
            }
            if wake > now {
                break;
            }
        }
        if wake <= now {
            log::trace!("{} still busy after {} polls", uid, MAX_POLLS_PER_WAKE);
            wake = now + Duration::from_millis(1);
        }
        self.schedule_wake(uid, wake);
    }

    fn schedule_wake(&mut self, uid: Uid, at: Timestamp) {
        if let Some(&pending) = self.wakes.get(&uid) {
            if pending >= self.current_time && pending <= at {
                return;
            }
        }
        self.wakes.insert(uid, at);
        self.schedule(at, Event::Wake { node: uid });
    }

    /// Put a frame on air: every active neighbour gets it after its time on
    /// air, and the sender's radio reports completion at the same moment.
    fn transmit(&mut self, sender: Uid, frame: Vec<u8>, airtime: Duration) {
        self.metrics.frames_sent += 1;
        let now = self.current_time;
        self.schedule(now + airtime, Event::TxDone { node: sender });

        let mut arrivals = Vec::new();
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay, rssi) = (link.loss_rate, link.delay, link.rssi);
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_lost += 1;
                continue;
            }
            arrivals.push((neighbor, now + airtime + delay, rssi));
        }

        for (to, at, rssi) in arrivals {
            self.schedule(
                at,
                Event::FrameArrival {
                    to,
                    frame: frame.clone(),
                    rssi,
                    from: sender,
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's counters now.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = NetworkSnapshot::new(self.current_time);
        for (&uid, node) in &self.nodes {
            let inner = node.inner();
            snapshot.record_node(
                uid,
                inner.metrics().clone(),
                node.neighbor_count(),
                inner.ledger().len(),
            );
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Generate a random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Link;
    use hopmesh::{Event as NodeEvent, RangePreset};

    const A: Uid = Uid::new([0x01, 0x02, 0x03]);
    const B: Uid = Uid::new([0x04, 0x05, 0x06]);

    fn pair() -> Simulator {
        let mut sim = Simulator::new(42).with_topology(Topology::fully_connected(&[A, B]));
        sim.add_node(A).unwrap();
        sim.add_node(B).unwrap();
        sim
    }

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert!(sim.node_ids().is_empty());
    }

    #[test]
    fn test_add_nodes() {
        let sim = pair();
        assert_eq!(sim.node_ids(), [A, B]);
        assert!(sim.node(&A).unwrap().inner().radio().is_receiving());
    }

    #[test]
    fn test_hello_reaches_neighbor() {
        let mut sim = pair();
        sim.command(Timestamp::ZERO, A, Command::Hello { ack: false });
        let result = sim.run_for(Duration::from_secs(1));

        assert_eq!(result.metrics.frames_sent, 1);
        assert_eq!(result.metrics.frames_delivered, 1);
        let at_b: Vec<_> = result.metrics.events_at(B).collect();
        assert_eq!(at_b.len(), 1);
        assert_eq!(at_b[0].event, NodeEvent::Hello { from: A });
        // Arrives one time on air after keying, at the earliest.
        assert!(at_b[0].time >= Timestamp::from_millis(30));
        assert_eq!(sim.node(&B).unwrap().neighbor_count(), 1);
    }

    #[test]
    fn test_frame_lost_while_not_listening() {
        let mut sim = pair();
        // Reconfiguring leaves the radio in standby until the next poll.
        sim.node_mut(&B)
            .unwrap()
            .inner_mut()
            .set_range(RangePreset::Fast)
            .unwrap();
        sim.schedule(
            Timestamp::ZERO,
            Event::FrameArrival {
                to: B,
                frame: vec![0; 17],
                rssi: -60,
                from: A,
            },
        );
        sim.run_events(1);
        assert_eq!(sim.metrics().half_duplex_drops, 1);
        assert_eq!(sim.metrics().frames_delivered, 0);
    }

    #[test]
    fn test_lossy_link_drops_frames() {
        let topo = Topology::new().with_default_link(Link::new().with_loss_rate(1.0)).connect_all(&[A, B]);
        let mut sim = Simulator::new(1).with_topology(topo);
        sim.add_node(A).unwrap();
        sim.add_node(B).unwrap();
        sim.command(Timestamp::ZERO, A, Command::Hello { ack: false });

        let result = sim.run_for(Duration::from_secs(1));
        assert_eq!(result.metrics.frames_sent, 1);
        assert_eq!(result.metrics.frames_lost, 1);
        assert!(result.metrics.events.is_empty());
    }

    #[test]
    fn test_partition_action() {
        let mut sim = pair();
        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::Partition {
                groups: vec![vec![A], vec![B]],
            },
        );
        sim.command(Timestamp::from_secs(1), A, Command::Hello { ack: false });
        let result = sim.run_for(Duration::from_secs(2));

        assert!(!sim.topology().is_connected(A, B));
        assert_eq!(result.metrics.frames_sent, 1);
        assert_eq!(result.metrics.frames_delivered, 0);
    }

    #[test]
    fn test_snapshots_at_interval() {
        let mut sim = Simulator::new(42)
            .with_topology(Topology::fully_connected(&[A, B]))
            .with_snapshot_interval(Duration::from_millis(500));
        sim.add_node(A).unwrap();
        sim.add_node(B).unwrap();
        let result = sim.run_for(Duration::from_secs(2));

        assert!(result.metrics.snapshots.len() >= 4);
        assert_eq!(result.metrics.latest_snapshot().unwrap().counters.len(), 2);
        assert!(result.settled());
    }
}
