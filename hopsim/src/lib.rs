//! hopsim - Discrete event simulator for hopmesh networks.
//!
//! Runs several hopmesh nodes in one process over a simulated shared channel,
//! deterministically and without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Simulated half-duplex radios**: A keyed radio misses what arrives meanwhile
//! - **Time on air**: Frames take the sender's preset airtime to arrive
//! - **Configurable topology**: Fully connected, chain, star, or custom
//! - **Link properties**: RSSI, frame loss, extra delay per link
//! - **Scenario builder**: Scheduled commands, partitions and healing
//! - **Metrics collection**: Per-node counters and every application event
//!
//! # Example
//!
//! ```
//! use hopsim::{Command, ScenarioBuilder, Duration, Timestamp, BROADCAST};
//!
//! let result = ScenarioBuilder::new(2)
//!     .fully_connected()
//!     .command_at(Timestamp::ZERO, 0, Command::Ping { dst: BROADCAST })
//!     .run_for(Duration::from_secs(2));
//!
//! // PING and PONG
//! assert_eq!(result.metrics.frames_sent, 2);
//! ```
//!
//! # Architecture
//!
//! The simulator keeps a priority queue of events ordered by
//! (time, sequence_number). Each event (frame arrival, end of transmission,
//! wake-up, user command) ends with the affected node being polled until its
//! scheduler has nothing left to do at that instant. Frames it keyed are
//! scheduled to arrive at its neighbours, and its next wake-up comes from
//! `Node::next_wake`.
//!
//! Nodes are driven through `poll()` instead of the async `run()` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Command, Event, ScenarioAction, ScheduledEvent};
pub use hopmesh::{Duration, Timestamp, Uid, BROADCAST};
pub use metrics::{LoggedEvent, NetworkSnapshot, SimMetrics, SimulationResult};
pub use node::{SimNode, SimRadio};
pub use scenario::{long_range_scenario, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Link, Topology};
