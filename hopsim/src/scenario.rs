//! Scenario builder for setting up and running simulations.

use hopmesh::{Duration, RangePreset, Timestamp, Uid};

use crate::event::{Command, ScenarioAction};
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{Link, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    Star,
    Custom(Topology),
}

/// A scheduled action whose nodes are still given by index.
#[derive(Debug, Clone)]
enum PlannedAction {
    Partition(Vec<Vec<usize>>),
    Heal,
    Snapshot,
    Command(usize, Command),
}

/// Builder for simulation scenarios.
///
/// Node `i` gets the address `3i+1 : 3i+2 : 3i+3` unless addresses are given
/// with [`ScenarioBuilder::with_uids`], so the first three nodes are
/// `01:02:03`, `04:05:06` and `07:08:09`.
pub struct ScenarioBuilder {
    num_nodes: usize,
    uids: Option<Vec<Uid>>,
    seed: u64,
    /// Topology type to generate (must be explicitly specified).
    topology_type: Option<TopologyType>,
    link: Link,
    actions: Vec<(Timestamp, PlannedAction)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Note: You MUST specify a topology before calling build().
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            uids: None,
            seed: 42,
            topology_type: None,
            link: Link::default(),
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use these addresses instead of the generated ones.
    pub fn with_uids(mut self, uids: Vec<Uid>) -> Self {
        self.num_nodes = uids.len();
        self.uids = Some(uids);
        self
    }

    /// Set a custom network topology. Link settings of the builder are not applied to it.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    /// Use star topology (first node is hub).
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Set packet loss rate on every link.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.link = self.link.with_loss_rate(rate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.link = self.link.with_delay(delay);
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.link = self.link.with_rssi(rssi);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Issue `command` on node `node` (by index) at `time`.
    pub fn command_at(mut self, time: Timestamp, node: usize, command: Command) -> Self {
        self.actions.push((time, PlannedAction::Command(node, command)));
        self
    }

    /// Schedule a network partition; groups are node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        self.actions.push((time, PlannedAction::Partition(groups)));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, PlannedAction::Heal));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, PlannedAction::Snapshot));
        self
    }

    /// Build the simulator with all nodes and topology.
    pub fn build(self) -> (Simulator, Vec<Uid>) {
        let uids: Vec<Uid> = match self.uids {
            Some(uids) => uids,
            None => (0..self.num_nodes).map(default_uid).collect(),
        };

        let shaped = Topology::new().with_default_link(self.link);
        let topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => shaped.connect_all(&uids),
            Some(TopologyType::Chain) => shaped.connect_chain(&uids),
            Some(TopologyType::Star) => shaped.connect_star(&uids),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology(), or .topology()"
            ),
        };

        let mut sim = Simulator::new(self.seed).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }
        for &uid in &uids {
            if let Err(e) = sim.add_node(uid) {
                panic!("cannot add node {}: {}", uid, e);
            }
        }

        let node = |i: usize| uids.get(i).copied();
        for (time, action) in self.actions {
            match action {
                PlannedAction::Partition(groups) => {
                    let groups = groups
                        .into_iter()
                        .map(|g| g.into_iter().filter_map(node).collect())
                        .collect();
                    sim.schedule_action(time, ScenarioAction::Partition { groups });
                }
                PlannedAction::Heal => sim.schedule_action(time, ScenarioAction::HealPartition),
                PlannedAction::Snapshot => sim.schedule_action(time, ScenarioAction::TakeSnapshot),
                PlannedAction::Command(i, command) => {
                    if let Some(uid) = node(i) {
                        sim.command(time, uid, command);
                    }
                }
            }
        }

        (sim, uids)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

fn default_uid(index: usize) -> Uid {
    let base = (index * 3) as u8;
    Uid::new([base + 1, base + 2, base + 3])
}

/// N handhelds that all hear each other.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

/// Like [`simple_scenario`], with every node switched to the long range
/// preset at start.
pub fn long_range_scenario(num_nodes: usize) -> ScenarioBuilder {
    (0..num_nodes).fold(simple_scenario(num_nodes), |b, i| {
        b.command_at(Timestamp::ZERO, i, Command::SetRange(RangePreset::LongRange))
    })
}
