use crate::config::validate_horizon;
use crate::node::BlockedEntry;
use crate::{
    ArrivalNode, ClassId, CustomerId, DeadlockDetector, Destination, ExitNode,
    InvariantViolation, KnotDetector, Network, NoDetection, Node, NodeEvent, NodeId,
    ProbabilisticRouting, Result, Route, ServerId, ServiceRecord, SimRng,
};

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use rand::SeedableRng;
use serde::Serialize;

/// Number of customers present at a node and how many of them are blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeState {
    /// Customers at the node, waiting or at a server.
    pub present: usize,
    /// Customers done with service that cannot move on.
    pub blocked: usize,
}

/// Discretized state of the network: one [`NodeState`] per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NetworkState(pub Vec<NodeState>);

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .format_with(" ", |s, f| f(&format_args!("{}/{}", s.present, s.blocked)))
        )
    }
}

/// Report of a detected deadlock.
#[derive(Debug, Clone, PartialEq)]
pub struct Deadlock {
    /// Time at which the deadlock occurred.
    pub time: f64,
    /// State of the network at that time.
    pub state: NetworkState,
    /// Deadlocked groups of servers.
    pub knots: Vec<Vec<ServerId>>,
    /// For each state visited while running until the deadlock, the time from its first visit
    /// to the deadlock.
    pub times_to_deadlock: BTreeMap<NetworkState, f64>,
}

/// Type of a traced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceKind {
    /// A customer entered the network.
    Arrival {
        /// Customer ID.
        customer: CustomerId,
        /// Customer class.
        class: ClassId,
        /// Node of entry.
        node: NodeId,
    },
    /// An arriving customer was dropped because its node was full.
    Rejection {
        /// Customer ID.
        customer: CustomerId,
        /// Customer class.
        class: ClassId,
        /// Full node.
        node: NodeId,
    },
    /// A customer finished service.
    ServiceEnd {
        /// Customer ID.
        customer: CustomerId,
        /// Node of service.
        node: NodeId,
    },
    /// A served customer got blocked by a full destination.
    Blocked {
        /// Customer ID.
        customer: CustomerId,
        /// Node holding the customer.
        node: NodeId,
        /// Full destination.
        destination: NodeId,
    },
    /// A customer left a node.
    Departure {
        /// Customer ID.
        customer: CustomerId,
        /// Node left.
        node: NodeId,
        /// Next node, `None` when leaving the network.
        destination: Option<NodeId>,
    },
    /// A node switched to its next duty shift.
    ShiftChange {
        /// Node changing shifts.
        node: NodeId,
    },
}

/// Entry of the event trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceEntry {
    /// Time of the event.
    pub time: f64,
    /// What happened.
    pub kind: TraceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Arrival,
    Node(usize, NodeEvent),
}

/// Configures and constructs a [`Simulation`].
pub struct SimulationBuilder<'a> {
    network: &'a Network,
    seed: u64,
    routing: Option<Box<dyn Route>>,
    deadlock_detection: Option<bool>,
    trace: bool,
}

impl<'a> SimulationBuilder<'a> {
    /// Starts building a simulation of `network`.
    #[must_use]
    pub fn new(network: &'a Network) -> Self {
        Self {
            network,
            seed: 0,
            routing: None,
            deadlock_detection: None,
            trace: false,
        }
    }

    /// Seed of the random number generator.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Routing policy. By default, customers are routed by the routing probabilities.
    #[must_use]
    pub fn routing(mut self, routing: Box<dyn Route>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Enables or disables deadlock detection. By default, it is enabled if and only if any
    /// node has a bounded waiting room.
    #[must_use]
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = Some(enabled);
        self
    }

    /// Records every processed event when enabled.
    #[must_use]
    pub fn trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Constructs the simulation at time 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be turned into nodes or routing distributions.
    pub fn build(self) -> Result<Simulation> {
        let network = self.network;
        let mut rng = SimRng::seed_from_u64(self.seed);
        let arrivals = ArrivalNode::new(network, &mut rng);
        let mut first_server = 0;
        let nodes = network
            .nodes()
            .iter()
            .enumerate()
            .map(|(id, spec)| {
                let node = Node::new(NodeId::from(id), spec, ServerId::from(first_server));
                first_server += spec.servers();
                node
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let routing = match self.routing {
            Some(routing) => routing,
            None => Box::new(ProbabilisticRouting::new(network)?),
        };
        let detection = self
            .deadlock_detection
            .unwrap_or_else(|| network.has_finite_capacity());
        let detector: Box<dyn DeadlockDetector> = if detection {
            Box::new(KnotDetector::default())
        } else {
            Box::new(NoDetection)
        };
        let simulation = Simulation {
            time: 0.0,
            rng,
            arrivals,
            nodes,
            exit: ExitNode::default(),
            routing,
            detector,
            first_entry: BTreeMap::new(),
            track_states: detection,
            trace: if self.trace { Some(Vec::new()) } else { None },
        };
        log::debug!(
            "Built simulation with {} nodes, {} servers, deadlock detection {}",
            simulation.nodes.len(),
            first_server,
            if detection { "on" } else { "off" }
        );
        Ok(simulation)
    }
}

/// Discrete-event simulation of an open queueing network.
///
/// There is no global event queue: the next event is the earliest of the events that the
/// arrival node and every service node report. On ties, arrivals go first, and then nodes in
/// the order of their IDs.
pub struct Simulation {
    time: f64,
    rng: SimRng,
    arrivals: ArrivalNode,
    nodes: Vec<Node>,
    exit: ExitNode,
    routing: Box<dyn Route>,
    detector: Box<dyn DeadlockDetector>,
    first_entry: BTreeMap<NetworkState, f64>,
    track_states: bool,
    trace: Option<Vec<TraceEntry>>,
}

impl Simulation {
    /// Simulation of `network` with default settings.
    ///
    /// # Errors
    ///
    /// See [`SimulationBuilder::build`].
    pub fn new(network: &Network, seed: u64) -> Result<Self> {
        SimulationBuilder::new(network).seed(seed).build()
    }

    /// Current simulation time.
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Source of arrivals, along with acceptance and rejection counts.
    #[must_use]
    pub fn arrivals(&self) -> &ArrivalNode {
        &self.arrivals
    }

    /// Service nodes.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Customers that left the network.
    #[must_use]
    pub fn exit(&self) -> &ExitNode {
        &self.exit
    }

    /// Blocking relationships tracker.
    #[must_use]
    pub fn detector(&self) -> &dyn DeadlockDetector {
        self.detector.as_ref()
    }

    /// Processed events, if tracing is enabled.
    #[must_use]
    pub fn trace(&self) -> Option<&[TraceEntry]> {
        self.trace.as_deref()
    }

    /// Number of customers currently in the network.
    #[must_use]
    pub fn customers_in_network(&self) -> usize {
        self.nodes.iter().map(Node::occupancy).sum()
    }

    /// All finished visits: those of departed customers followed by the completed visits of
    /// customers still in the network.
    pub fn records(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.exit.records().chain(
            self.nodes
                .iter()
                .flat_map(|node| node.waiting().chain(node.at_servers()))
                .flat_map(|customer| customer.records().iter()),
        )
    }

    /// Current discretized state.
    #[must_use]
    pub fn state(&self) -> NetworkState {
        NetworkState(
            self.nodes
                .iter()
                .map(|node| NodeState {
                    present: node.occupancy(),
                    blocked: node.num_blocked(),
                })
                .collect(),
        )
    }

    /// Whether the network is deadlocked right now.
    #[must_use]
    pub fn is_deadlocked(&self) -> bool {
        self.detector.detect()
    }

    fn next_event(&self) -> Option<(f64, Event)> {
        let mut next = Some((self.arrivals.next_event_time(), Event::Arrival))
            .filter(|(time, _)| time.is_finite());
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some((time, event)) = node.next_event() {
                if next.map_or(true, |(best, _)| time < best) {
                    next = Some((time, Event::Node(idx, event)));
                }
            }
        }
        next
    }

    /// Processes the next event. Returns `false` if there is nothing left to process.
    ///
    /// # Errors
    ///
    /// Returns an error if the simulation reaches an inconsistent state.
    pub fn step(&mut self) -> Result<bool> {
        match self.next_event() {
            Some((time, event)) => {
                self.dispatch(time, event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Processes all events up to and including `horizon`.
    ///
    /// # Errors
    ///
    /// Returns an error if `horizon` is negative, or if the simulation reaches an inconsistent
    /// state.
    pub fn run_until(&mut self, horizon: f64) -> Result<()> {
        validate_horizon(horizon)?;
        log::info!("Running simulation from {} until {}", self.time, horizon);
        while let Some((time, event)) = self.next_event() {
            if time > horizon {
                break;
            }
            self.dispatch(time, event)?;
        }
        if horizon.is_finite() {
            self.time = self.time.max(horizon);
        }
        log::info!(
            "Simulation stopped at {}: {} departed, {} in network, {} rejected",
            self.time,
            self.exit.len(),
            self.customers_in_network(),
            self.arrivals.total_rejections()
        );
        Ok(())
    }

    /// Processes events until the network deadlocks or `horizon` is exceeded.
    /// Returns the deadlock report, or `None` if the horizon was reached first.
    ///
    /// With deadlock detection on, the first visit of every network state is recorded from the
    /// start of this call, including states entered in earlier calls that are visited again.
    ///
    /// # Errors
    ///
    /// Returns an error if `horizon` is negative, or if the simulation reaches an inconsistent
    /// state.
    pub fn run_until_deadlock(&mut self, horizon: f64) -> Result<Option<Deadlock>> {
        validate_horizon(horizon)?;
        log::info!("Running simulation from {} until deadlock", self.time);
        self.track_state(self.time);
        if self.detector.detect() {
            return Ok(Some(self.deadlock()));
        }
        while let Some((time, event)) = self.next_event() {
            if time > horizon {
                break;
            }
            self.dispatch(time, event)?;
            self.track_state(time);
            if let Event::Node(..) = event {
                if self.detector.detect() {
                    let deadlock = self.deadlock();
                    log::info!("Deadlock at {} in state {}", deadlock.time, deadlock.state);
                    return Ok(Some(deadlock));
                }
            }
        }
        if horizon.is_finite() {
            self.time = self.time.max(horizon);
        }
        log::info!("No deadlock until {}", self.time);
        Ok(None)
    }

    fn deadlock(&self) -> Deadlock {
        Deadlock {
            time: self.time,
            state: self.state(),
            knots: self.detector.knots(),
            times_to_deadlock: self
                .first_entry
                .iter()
                .map(|(state, first)| (state.clone(), self.time - first))
                .collect(),
        }
    }

    fn track_state(&mut self, time: f64) {
        if self.track_states {
            let state = self.state();
            self.first_entry.entry(state).or_insert(time);
        }
    }

    fn record(&mut self, time: f64, kind: TraceKind) {
        if let Some(trace) = &mut self.trace {
            trace.push(TraceEntry { time, kind });
        }
    }

    fn node_index(&self, node: NodeId) -> Result<usize> {
        let idx = usize::from(node);
        if idx < self.nodes.len() {
            Ok(idx)
        } else {
            Err(InvariantViolation::UnknownNode(node).into())
        }
    }

    fn dispatch(&mut self, time: f64, event: Event) -> Result<()> {
        self.time = time;
        match event {
            Event::Arrival => self.arrive(time)?,
            Event::Node(idx, NodeEvent::ShiftChange) => {
                self.nodes[idx].change_shift(time);
                self.record(
                    time,
                    TraceKind::ShiftChange {
                        node: NodeId::from(idx),
                    },
                );
            }
            Event::Node(idx, NodeEvent::Release) => self.release(idx, time)?,
        }
        Ok(())
    }

    fn arrive(&mut self, time: f64) -> Result<()> {
        let (customer, node) = match self.arrivals.fire(&mut self.rng) {
            Some(arrival) => arrival,
            None => return Ok(()),
        };
        let idx = self.node_index(node)?;
        let id = customer.id();
        let class = customer.class();
        match self.nodes[idx].accept(customer, time, &mut self.rng) {
            Ok(()) => {
                self.arrivals.accept();
                log::trace!(
                    "[{}] Customer {} of class {} arrives at node {}",
                    time,
                    id,
                    class,
                    node
                );
                self.record(
                    time,
                    TraceKind::Arrival {
                        customer: id,
                        class,
                        node,
                    },
                );
            }
            Err(_) => {
                self.arrivals.reject(node, class);
                log::debug!("[{}] Node {} is full, customer {} dropped", time, node, id);
                self.record(
                    time,
                    TraceKind::Rejection {
                        customer: id,
                        class,
                        node,
                    },
                );
            }
        }
        Ok(())
    }

    fn release(&mut self, idx: usize, time: f64) -> Result<()> {
        let node_id = NodeId::from(idx);
        let slot = self.nodes[idx].finish_service()?;
        let class = self.nodes[idx].change_class(slot, &mut self.rng)?;
        let customer = self.nodes[idx].customer_at(slot)?.id();
        self.record(time, TraceKind::ServiceEnd { customer, node: node_id });
        let occupancy: Vec<usize> = self.nodes.iter().map(Node::occupancy).collect();
        let destination = self
            .routing
            .route(node_id, class, &occupancy, &mut self.rng);
        if let Destination::Node(dest) = destination {
            if !self.nodes[self.node_index(dest)?].has_space() {
                return self.block(idx, slot, dest, time);
            }
        }
        self.depart(idx, slot, destination, time)?;
        self.unblock(idx, time)
    }

    fn block(&mut self, idx: usize, slot: usize, destination: NodeId, time: f64) -> Result<()> {
        let dest = self.node_index(destination)?;
        let node_id = NodeId::from(idx);
        let server = self.nodes[idx].block(slot, destination)?;
        let customer = self.nodes[idx].customer_at(slot)?.id();
        self.nodes[dest].push_blocked(BlockedEntry {
            node: node_id,
            slot,
            server,
        });
        let targets: Vec<ServerId> = self.nodes[dest].server_ids().collect();
        self.detector.on_block(server, &targets);
        log::debug!(
            "[{}] Customer {} at server {} of node {} blocked by node {}",
            time,
            customer,
            server,
            node_id,
            destination
        );
        self.record(
            time,
            TraceKind::Blocked {
                customer,
                node: node_id,
                destination,
            },
        );
        Ok(())
    }

    /// Moves the customer at `slot` of node `idx` to `destination`, which must have space.
    fn depart(
        &mut self,
        idx: usize,
        slot: usize,
        destination: Destination,
        time: f64,
    ) -> Result<()> {
        let server = self.nodes[idx].server_id(slot);
        let customer = self.nodes[idx].release(slot, time, destination)?;
        self.detector.on_unblock(server);
        let blockers: Vec<ServerId> = self.nodes[idx].blocked_upstream().collect();
        if !blockers.is_empty() {
            self.detector.on_reattach(server, &blockers);
        }
        self.record(
            time,
            TraceKind::Departure {
                customer: customer.id(),
                node: NodeId::from(idx),
                destination: destination.node(),
            },
        );
        match destination {
            Destination::Node(dest) => {
                let dest_idx = self.node_index(dest)?;
                self.nodes[dest_idx]
                    .accept(customer, time, &mut self.rng)
                    .map_err(|_| InvariantViolation::NoSpace(dest))?;
            }
            Destination::Exit => self.exit.accept(customer, time),
        }
        Ok(())
    }

    /// Lets blocked customers into the node `freed` while it has space. Each admitted customer
    /// frees a slot at its own node in turn, so the cascade continues upstream.
    fn unblock(&mut self, mut freed: usize, time: f64) -> Result<()> {
        while self.nodes[freed].has_space() {
            let entry = match self.nodes[freed].pop_blocked() {
                Some(entry) => entry,
                None => break,
            };
            let upstream = self.node_index(entry.node)?;
            log::debug!(
                "[{}] Server {} of node {} unblocked by node {}",
                time,
                entry.server,
                entry.node,
                freed
            );
            self.depart(
                upstream,
                entry.slot,
                Destination::Node(NodeId::from(freed)),
                time,
            )?;
            freed = upstream;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DistributionConfig, DistributionKind, NetworkConfig, ServersConfig};
    use float_cmp::approx_eq;
    use std::convert::TryFrom;

    fn deterministic(value: f64) -> DistributionConfig {
        DistributionConfig::new(DistributionKind::Deterministic, vec![value])
    }

    /// Single node, one server, no waiting room, deterministic service.
    fn single(rate: f64, service: f64) -> Network {
        Network::try_from(NetworkConfig {
            arrival_rates: vec![vec![rate]],
            service_distributions: vec![vec![deterministic(service)]],
            servers: vec![ServersConfig::Count(1.0)],
            queue_capacities: Some(vec![Some(0)]),
            routing: vec![vec![vec![0.0]]],
            class_change: None,
        })
        .unwrap()
    }

    #[test]
    fn test_negative_horizon() {
        let mut simulation = Simulation::new(&single(1.0, 1.0), 0).unwrap();
        assert!(simulation.run_until(-1.0).is_err());
        assert!(simulation.run_until_deadlock(-0.1).is_err());
        assert!(simulation.exit().is_empty());
    }

    #[test]
    fn test_no_arrivals() {
        let mut simulation = Simulation::new(&single(0.0, 1.0), 0).unwrap();
        assert!(!simulation.step().unwrap());
        simulation.run_until(10.0).unwrap();
        assert_eq!(simulation.time(), 10.0);
        assert_eq!(simulation.arrivals().generated(), 0);
    }

    #[test]
    fn test_rejections_and_trace() {
        let network = single(10.0, 1.0);
        let mut simulation = SimulationBuilder::new(&network)
            .seed(7)
            .trace(true)
            .build()
            .unwrap();
        simulation.run_until(50.0).unwrap();
        let arrivals = simulation.arrivals();
        assert!(arrivals.total_rejections() > 0);
        assert_eq!(
            arrivals.generated(),
            arrivals.accepted() + arrivals.total_rejections()
        );
        assert_eq!(
            arrivals.accepted(),
            simulation.exit().len() + simulation.customers_in_network()
        );
        let trace = simulation.trace().unwrap();
        let rejections = trace
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Rejection { .. }))
            .count();
        assert_eq!(rejections, arrivals.total_rejections());
        assert!(trace.windows(2).all(|w| w[0].time <= w[1].time));
        assert!(simulation
            .records()
            .all(|r| approx_eq!(f64, r.sojourn(), 1.0, epsilon = 1e-9)));
    }

    #[test]
    fn test_states_recorded_only_until_deadlock() {
        let network = single(2.0, 1.0);
        let mut simulation = Simulation::new(&network, 3).unwrap();
        simulation.run_until(50.0).unwrap();
        assert!(simulation.first_entry.is_empty());
        assert_eq!(simulation.run_until_deadlock(60.0).unwrap(), None);
        assert!(!simulation.first_entry.is_empty());
        assert!(simulation.first_entry.values().all(|&t| t >= 50.0));
    }

    #[test]
    fn test_state_display() {
        let state = NetworkState(vec![
            NodeState {
                present: 2,
                blocked: 1,
            },
            NodeState {
                present: 0,
                blocked: 0,
            },
        ]);
        assert_eq!(state.to_string(), "2/1 0/0");
    }
}
