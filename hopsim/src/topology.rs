//! Network topology and link properties.

use hashbrown::HashMap;
use hopmesh::{Duration, Uid};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength reported by the receiving radio, in dBm.
    pub rssi: i16,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Extra delay on top of the frame's time on air.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            delay: Duration::ZERO,
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Who hears whom. Links are symmetric.
#[derive(Debug, Clone)]
pub struct Topology {
    links: HashMap<(Uid, Uid), Link>,
    /// Properties given to links created by the shape constructors.
    default_link: Link,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            default_link: Link::default(),
        }
    }

    /// Set default link properties for the shape constructors.
    pub fn with_default_link(mut self, link: Link) -> Self {
        self.default_link = link;
        self
    }

    /// Everyone hears everyone.
    pub fn fully_connected(nodes: &[Uid]) -> Self {
        Self::new().connect_all(nodes)
    }

    /// Each node hears only the previous and the next one.
    pub fn chain(nodes: &[Uid]) -> Self {
        Self::new().connect_chain(nodes)
    }

    /// The first node hears everyone; the others hear only the first.
    pub fn star(nodes: &[Uid]) -> Self {
        Self::new().connect_star(nodes)
    }

    pub(crate) fn connect_all(mut self, nodes: &[Uid]) -> Self {
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                self.add_link(a, b, self.default_link.clone());
            }
        }
        self
    }

    pub(crate) fn connect_chain(mut self, nodes: &[Uid]) -> Self {
        for pair in nodes.windows(2) {
            self.add_link(pair[0], pair[1], self.default_link.clone());
        }
        self
    }

    pub(crate) fn connect_star(mut self, nodes: &[Uid]) -> Self {
        let Some((&hub, spokes)) = nodes.split_first() else {
            return self;
        };
        for &spoke in spokes {
            self.add_link(hub, spoke, self.default_link.clone());
        }
        self
    }

    /// Add (or replace) the link between two nodes.
    pub fn add_link(&mut self, a: Uid, b: Uid, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: Uid, b: Uid) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: Uid, b: Uid) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: Uid, b: Uid) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes that hear `node` over an active link, in address order.
    pub fn neighbors(&self, node: Uid) -> Vec<Uid> {
        let mut result: Vec<Uid> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Disable all links crossing between partition groups.
    pub fn partition(&mut self, groups: &[Vec<Uid>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn default_link(&self) -> &Link {
        &self.default_link
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn canonical_pair(a: Uid, b: Uid) -> (Uid, Uid) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(n: u8) -> Vec<Uid> {
        (1..=n).map(|i| Uid::new([i, i, i])).collect()
    }

    #[test]
    fn test_fully_connected() {
        let nodes = make_nodes(3);
        let topo = Topology::fully_connected(&nodes);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[0], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[1]));
        assert_eq!(topo.link_count(), 3);
    }

    #[test]
    fn test_chain() {
        let nodes = make_nodes(4);
        let topo = Topology::chain(&nodes);

        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[1], nodes[2]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[0], nodes[3]));
    }

    #[test]
    fn test_star() {
        let nodes = make_nodes(4);
        let topo = Topology::star(&nodes);

        assert_eq!(topo.neighbors(nodes[0]), &nodes[1..]);
        assert_eq!(topo.neighbors(nodes[2]), [nodes[0]]);
        assert!(!topo.is_connected(nodes[1], nodes[2]));
        assert!(Topology::star(&[]).neighbors(nodes[0]).is_empty());
    }

    #[test]
    fn test_default_link_applies_to_shapes() {
        let nodes = make_nodes(2);
        let topo = Topology::new()
            .with_default_link(Link::new().with_rssi(-110).with_loss_rate(2.0))
            .connect_all(&nodes);

        let link = topo.get_link(nodes[1], nodes[0]).unwrap();
        assert_eq!(link.rssi, -110);
        assert_eq!(link.loss_rate, 1.0);
    }

    #[test]
    fn test_partition_and_heal() {
        let nodes = make_nodes(4);
        let mut topo = Topology::fully_connected(&nodes);

        topo.partition(&[vec![nodes[0], nodes[1]], vec![nodes[2], nodes[3]]]);
        assert!(topo.is_connected(nodes[0], nodes[1]));
        assert!(topo.is_connected(nodes[2], nodes[3]));
        assert!(!topo.is_connected(nodes[0], nodes[2]));
        assert!(!topo.is_connected(nodes[1], nodes[3]));
        assert_eq!(topo.neighbors(nodes[0]), [nodes[1]]);

        topo.heal();
        assert!(topo.is_connected(nodes[0], nodes[2]));
    }

    #[test]
    fn test_neighbors_skip_inactive_links() {
        let nodes = make_nodes(3);
        let mut topo = Topology::chain(&nodes);
        topo.get_link_mut(nodes[1], nodes[2]).unwrap().active = false;
        assert_eq!(topo.neighbors(nodes[1]), [nodes[0]]);
    }
}
