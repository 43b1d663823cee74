//! Open queueing network simulation.
//!
//! Customers of several classes arrive from outside, visit a number of multi-server nodes with
//! finite or infinite waiting rooms, and eventually leave. Nodes use block-after-service
//! blocking: a customer that finished service but cannot enter a full downstream node keeps
//! occupying its server until room frees up. With finite capacities, the network may end up in a
//! state where nobody can ever move again; [`KnotDetector`] recognizes such states.
//!
//! The kernel is strictly single-threaded: one [`Simulation`] owns its nodes, its random number
//! generator, and its clock. Independent replications can run in parallel with [`replicate`].

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::inline_always,
    clippy::cast_precision_loss
)]

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

mod arrival;
pub use arrival::ArrivalNode;

mod config;
pub use config::{
    DistributionConfig, Network, NetworkConfig, NodeSpec, ServersConfig, ShiftConfig,
};

mod customer;
pub use customer::{Customer, ServiceRecord};

pub mod deadlock;
pub use deadlock::{BlockingGraph, DeadlockDetector, KnotDetector, NoDetection};

mod distribution;
pub use distribution::{DistributionKind, Sampler};

mod error;
pub use error::{ConfigError, Error, InvariantViolation, RecordError, Result};

mod exit;
pub use exit::ExitNode;

mod node;
pub use node::{Node, NodeEvent, Server};

mod replication;
pub use replication::replicate;

pub mod routing;
pub use routing::{ProbabilisticRouting, Route, ShortestQueueRouting};

mod schedule;
pub use schedule::{Schedule, ShiftCursor};

mod simulation;
pub use simulation::{
    Deadlock, NetworkState, NodeState, Simulation, SimulationBuilder, TraceEntry, TraceKind,
};

/// The random number generator driving a simulation run.
pub type SimRng = rand_chacha::ChaChaRng;

/// Node ID.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct NodeId(usize);

/// Customer class ID.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct ClassId(usize);

/// Customer ID, unique throughout the entire simulation.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct CustomerId(usize);

/// Server ID. Servers of all nodes are numbered consecutively, so this is a stable index that
/// identifies a server across the entire network.
#[derive(
    From, Into, Debug, PartialEq, PartialOrd, Eq, Ord, Serialize, Deserialize, Copy, Clone, Hash,
    Display,
)]
pub struct ServerId(usize);

/// Where a customer goes after finishing service.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub enum Destination {
    /// Another (or the same) node of the network.
    Node(NodeId),
    /// Leaves the network.
    Exit,
}

impl Destination {
    /// Returns the node ID, or `None` if the customer leaves the network.
    #[must_use]
    pub fn node(self) -> Option<NodeId> {
        match self {
            Destination::Node(node_id) => Some(node_id),
            Destination::Exit => None,
        }
    }
}
