use crate::{ClassId, NodeId, ServerId};

/// Error type encompassing all simulation errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The network configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A service record could not be constructed.
    #[error("Invalid service record: {0}")]
    Record(#[from] RecordError),
    /// The simulation reached a state that its own bookkeeping should have made impossible.
    #[error("Internal invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Result alias using [`Error`](enum.Error.html).
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors, detected before any event is processed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// There must be at least one customer class.
    #[error("There must be at least one customer class.")]
    NoClasses,
    /// There must be at least one node.
    #[error("There must be at least one node.")]
    NoNodes,
    /// A per-class table has a different number of classes than the arrival rates.
    #[error("Table `{table}` defines {found} classes but {expected} were expected.")]
    ClassCountMismatch {
        /// Name of the inconsistent table.
        table: &'static str,
        /// Number of classes defined by the arrival rates.
        expected: usize,
        /// Number of classes found in the table.
        found: usize,
    },
    /// A per-node table has a different number of nodes than the node definitions.
    #[error("Table `{table}` defines {found} nodes but {expected} were expected.")]
    NodeCountMismatch {
        /// Name of the inconsistent table.
        table: &'static str,
        /// Number of nodes in the network.
        expected: usize,
        /// Number of nodes found in the table.
        found: usize,
    },
    /// Arrival rates cannot be negative.
    #[error("Negative arrival rate {rate} for class {class} at node {node}.")]
    NegativeArrivalRate {
        /// Customer class.
        class: ClassId,
        /// Node receiving the arrivals.
        node: NodeId,
        /// Offending rate.
        rate: f64,
    },
    /// Server counts must be positive integers.
    #[error("Node {node} has an invalid number of servers: {value}.")]
    InvalidServerCount {
        /// Offending node.
        node: NodeId,
        /// Offending count.
        value: f64,
    },
    /// Every probability must be within [0, 1].
    #[error("Probability {value} in `{table}` (class {class}, node {node}) is outside of [0, 1].")]
    ProbabilityOutOfRange {
        /// Name of the table.
        table: &'static str,
        /// Customer class of the row.
        class: ClassId,
        /// Origin node of the row.
        node: NodeId,
        /// Offending value.
        value: f64,
    },
    /// Routing probabilities out of a node cannot sum to more than 1.
    #[error("Routing probabilities of class {class} out of node {node} sum up to {sum} > 1.")]
    RoutingRowSum {
        /// Customer class.
        class: ClassId,
        /// Origin node.
        node: NodeId,
        /// Row sum.
        sum: f64,
    },
    /// Class change probabilities must sum to exactly 1.
    #[error("Class change probabilities of class {class} at node {node} sum up to {sum} != 1.")]
    ClassChangeRowSum {
        /// Original class.
        class: ClassId,
        /// Node where the change happens.
        node: NodeId,
        /// Row sum.
        sum: f64,
    },
    /// Distribution parameters are invalid.
    #[error("Invalid service distribution for class {class} at node {node}: {reason}")]
    InvalidDistribution {
        /// Customer class.
        class: ClassId,
        /// Node.
        node: NodeId,
        /// What is wrong with the parameters.
        reason: String,
    },
    /// Duty schedule is invalid.
    #[error("Invalid duty schedule at node {node}: {reason}")]
    InvalidSchedule {
        /// Node.
        node: NodeId,
        /// What is wrong with the schedule.
        reason: String,
    },
    /// Simulation cannot run into the past.
    #[error("Simulation horizon cannot be negative: {0}")]
    NegativeHorizon(f64),
}

/// Errors returned when constructing a [`ServiceRecord`](crate::ServiceRecord).
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RecordError {
    /// Customer left before it arrived.
    #[error("Exit time {exit} precedes arrival time {arrival}.")]
    ExitBeforeArrival {
        /// Arrival time.
        arrival: f64,
        /// Exit time.
        exit: f64,
    },
    /// Customer left before its service ended.
    #[error("Exit time {exit} precedes service end time {service_end}.")]
    ExitBeforeServiceEnd {
        /// Service end time.
        service_end: f64,
        /// Exit time.
        exit: f64,
    },
    /// Service started before the customer arrived.
    #[error("Service start {service_start} precedes arrival time {arrival}.")]
    ServiceBeforeArrival {
        /// Arrival time.
        arrival: f64,
        /// Service start time.
        service_start: f64,
    },
    /// Service time cannot be negative.
    #[error("Negative service time: {0}")]
    NegativeServiceTime(f64),
    /// A timestamp required for the record was never set.
    #[error("Missing timestamp: {0}")]
    MissingTimestamp(&'static str),
}

/// Kernel bookkeeping failures. These are bugs, not user errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    /// Release requested from a node that has nobody in service.
    #[error("Attempted to release a customer from node {0} with nobody in service.")]
    EmptyRelease(NodeId),
    /// A server slot expected to hold a customer is empty.
    #[error("Server {0} holds no customer.")]
    EmptyServer(ServerId),
    /// A customer could not be accepted by a node that was reported to have space.
    #[error("Node {0} rejected a customer despite having space.")]
    NoSpace(NodeId),
    /// Node index out of bounds.
    #[error("Unknown node {0}.")]
    UnknownNode(NodeId),
}
