//! Network configuration and its validation.
//!
//! [`NetworkConfig`] mirrors the input format one-to-one and can be deserialized from JSON.
//! It is converted to a [`Network`] with `TryFrom`, which checks every table for consistency
//! and resolves service time distributions. A [`Network`] is therefore always valid.

use std::convert::TryFrom;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{ClassId, ConfigError, DistributionKind, NodeId, Sampler, Schedule};

/// Tolerance used when checking probability row sums.
const TOLERANCE: f64 = 1e-9;

/// Description of a service time distribution: its kind and numerical parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Type of distribution.
    pub kind: DistributionKind,
    /// Parameters, see [`DistributionKind`] for their meaning.
    #[serde(default)]
    pub params: Vec<f64>,
}

impl DistributionConfig {
    /// Constructs a new distribution description.
    #[must_use]
    pub fn new(kind: DistributionKind, params: Vec<f64>) -> Self {
        Self { kind, params }
    }
}

/// A single shift of a duty schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// Number of servers on duty.
    pub servers: usize,
    /// End of the shift within a cycle.
    pub end: f64,
}

/// Server configuration of a node: either a fixed number, or a cyclic duty schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServersConfig {
    /// Fixed number of servers. Must be a positive integer.
    Count(f64),
    /// Cyclic duty schedule.
    Schedule(Vec<ShiftConfig>),
}

/// Raw network configuration.
///
/// Tables are indexed by class first, then by node: `arrival_rates[class][node]`,
/// `service_distributions[class][node]`, and `routing[class][origin][destination]`.
/// The probability of leaving the network after a visit is whatever is missing for a routing
/// row to sum up to 1. Class change matrices are indexed as `class_change[node][from][to]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Exogenous arrival rates.
    pub arrival_rates: Vec<Vec<f64>>,
    /// Service time distributions.
    pub service_distributions: Vec<Vec<DistributionConfig>>,
    /// Servers of each node.
    pub servers: Vec<ServersConfig>,
    /// Waiting room of each node; `None` means unbounded. All unbounded if missing.
    #[serde(default)]
    pub queue_capacities: Option<Vec<Option<usize>>>,
    /// Routing probabilities.
    pub routing: Vec<Vec<Vec<f64>>>,
    /// Class change probabilities applied after service.
    #[serde(default)]
    pub class_change: Option<Vec<Vec<Vec<f64>>>>,
}

/// Validated configuration of a single node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub(crate) servers: usize,
    pub(crate) schedule: Option<Schedule>,
    pub(crate) queue_capacity: Option<usize>,
    pub(crate) samplers: Vec<Sampler>,
    pub(crate) class_change: Option<Array2<f64>>,
}

impl NodeSpec {
    /// Number of servers in the bank. With a schedule, this is the maximum on duty at once.
    #[must_use]
    pub fn servers(&self) -> usize {
        self.servers
    }

    /// The duty schedule, if any.
    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    /// Size of the waiting room, `None` if unbounded.
    #[must_use]
    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue_capacity
    }

    /// Maximum number of customers present at once: waiting room plus servers.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.queue_capacity.map(|queue| queue + self.servers)
    }
}

/// Validated network definition.
#[derive(Debug, Clone)]
pub struct Network {
    nodes: Vec<NodeSpec>,
    arrival_rates: Array2<f64>,
    routing: Vec<Array2<f64>>,
}

impl Network {
    /// Number of nodes, not counting the arrival and exit nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of customer classes.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.routing.len()
    }

    /// Node definitions.
    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Arrival rate of `class` customers at `node`.
    #[must_use]
    pub fn arrival_rate(&self, class: ClassId, node: NodeId) -> f64 {
        self.arrival_rates[[usize::from(class), usize::from(node)]]
    }

    /// All arrival rates, class by node.
    #[must_use]
    pub fn arrival_rates(&self) -> &Array2<f64> {
        &self.arrival_rates
    }

    /// Probabilities of moving from `node` to each other node for `class` customers.
    #[must_use]
    pub fn routing_row(&self, class: ClassId, node: NodeId) -> ArrayView1<'_, f64> {
        self.routing[usize::from(class)].row(usize::from(node))
    }

    /// Probability of leaving the network after a visit at `node` for `class` customers.
    #[must_use]
    pub fn exit_probability(&self, class: ClassId, node: NodeId) -> f64 {
        (1.0 - self.routing_row(class, node).sum()).max(0.0)
    }

    /// Whether any node has a bounded waiting room, i.e., whether blocking is possible.
    #[must_use]
    pub fn has_finite_capacity(&self) -> bool {
        self.nodes.iter().any(|n| n.queue_capacity.is_some())
    }
}

fn check_probability(
    table: &'static str,
    class: usize,
    node: usize,
    value: f64,
) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ProbabilityOutOfRange {
            table,
            class: ClassId(class),
            node: NodeId(node),
            value,
        })
    }
}

fn check_square(
    table: &'static str,
    matrix: &[Vec<f64>],
    size: usize,
    mismatch: fn(&'static str, usize, usize) -> ConfigError,
) -> Result<Array2<f64>, ConfigError> {
    if matrix.len() != size {
        return Err(mismatch(table, size, matrix.len()));
    }
    if let Some(row) = matrix.iter().find(|row| row.len() != size) {
        return Err(mismatch(table, size, row.len()));
    }
    Ok(Array2::from_shape_fn((size, size), |(i, j)| matrix[i][j]))
}

fn node_mismatch(table: &'static str, expected: usize, found: usize) -> ConfigError {
    ConfigError::NodeCountMismatch {
        table,
        expected,
        found,
    }
}

fn class_mismatch(table: &'static str, expected: usize, found: usize) -> ConfigError {
    ConfigError::ClassCountMismatch {
        table,
        expected,
        found,
    }
}

#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn server_count(node: usize, value: f64) -> Result<usize, ConfigError> {
    let integral = value.is_finite() && value.trunc() == value;
    if integral && value >= 1.0 {
        Ok(value as usize)
    } else {
        Err(ConfigError::InvalidServerCount {
            node: NodeId(node),
            value,
        })
    }
}

fn routing_matrices(
    config: &NetworkConfig,
    num_classes: usize,
    num_nodes: usize,
) -> Result<Vec<Array2<f64>>, ConfigError> {
    if config.routing.len() != num_classes {
        return Err(class_mismatch("routing", num_classes, config.routing.len()));
    }
    config
        .routing
        .iter()
        .enumerate()
        .map(|(class, matrix)| {
            let matrix = check_square("routing", matrix, num_nodes, node_mismatch)?;
            for (node, row) in matrix.outer_iter().enumerate() {
                for &p in row {
                    check_probability("routing", class, node, p)?;
                }
                let sum = row.sum();
                if sum > 1.0 + TOLERANCE {
                    return Err(ConfigError::RoutingRowSum {
                        class: ClassId(class),
                        node: NodeId(node),
                        sum,
                    });
                }
            }
            Ok(matrix)
        })
        .collect()
}

fn class_change_matrices(
    config: &NetworkConfig,
    num_classes: usize,
    num_nodes: usize,
) -> Result<Vec<Option<Array2<f64>>>, ConfigError> {
    let matrices = match &config.class_change {
        None => return Ok(vec![None; num_nodes]),
        Some(matrices) => matrices,
    };
    if matrices.len() != num_nodes {
        return Err(node_mismatch("class_change", num_nodes, matrices.len()));
    }
    matrices
        .iter()
        .enumerate()
        .map(|(node, matrix)| {
            let matrix = check_square("class_change", matrix, num_classes, class_mismatch)?;
            for (class, row) in matrix.outer_iter().enumerate() {
                for &p in row {
                    check_probability("class_change", class, node, p)?;
                }
                let sum = row.sum();
                if (sum - 1.0).abs() > TOLERANCE {
                    return Err(ConfigError::ClassChangeRowSum {
                        class: ClassId(class),
                        node: NodeId(node),
                        sum,
                    });
                }
            }
            Ok(Some(matrix))
        })
        .collect()
}

impl TryFrom<NetworkConfig> for Network {
    type Error = ConfigError;

    fn try_from(config: NetworkConfig) -> Result<Self, ConfigError> {
        let num_classes = config.arrival_rates.len();
        let num_nodes = config.servers.len();
        if num_classes == 0 {
            return Err(ConfigError::NoClasses);
        }
        if num_nodes == 0 {
            return Err(ConfigError::NoNodes);
        }

        for (class, rates) in config.arrival_rates.iter().enumerate() {
            if rates.len() != num_nodes {
                return Err(node_mismatch("arrival_rates", num_nodes, rates.len()));
            }
            if let Some((node, &rate)) = rates
                .iter()
                .enumerate()
                .find(|(_, rate)| !(rate.is_finite() && **rate >= 0.0))
            {
                return Err(ConfigError::NegativeArrivalRate {
                    class: ClassId(class),
                    node: NodeId(node),
                    rate,
                });
            }
        }
        let arrival_rates =
            Array2::from_shape_fn((num_classes, num_nodes), |(c, n)| config.arrival_rates[c][n]);

        if config.service_distributions.len() != num_classes {
            return Err(class_mismatch(
                "service_distributions",
                num_classes,
                config.service_distributions.len(),
            ));
        }
        if let Some(row) = config
            .service_distributions
            .iter()
            .find(|row| row.len() != num_nodes)
        {
            return Err(node_mismatch("service_distributions", num_nodes, row.len()));
        }

        let routing = routing_matrices(&config, num_classes, num_nodes)?;
        let class_change = class_change_matrices(&config, num_classes, num_nodes)?;

        let capacities = match &config.queue_capacities {
            Some(capacities) if capacities.len() != num_nodes => {
                return Err(node_mismatch("queue_capacities", num_nodes, capacities.len()));
            }
            Some(capacities) => capacities.clone(),
            None => vec![None; num_nodes],
        };

        let nodes = config
            .servers
            .iter()
            .zip(capacities)
            .zip(class_change)
            .enumerate()
            .map(|(node, ((servers, queue_capacity), class_change))| {
                let (servers, schedule) = match servers {
                    ServersConfig::Count(value) => (server_count(node, *value)?, None),
                    ServersConfig::Schedule(shifts) => {
                        let schedule = Schedule::new(
                            shifts.iter().map(|s| (s.servers, s.end)).collect(),
                        )
                        .map_err(|reason| ConfigError::InvalidSchedule {
                            node: NodeId(node),
                            reason,
                        })?;
                        (schedule.max_servers(), Some(schedule))
                    }
                };
                let samplers = config
                    .service_distributions
                    .iter()
                    .enumerate()
                    .map(|(class, row)| {
                        let dist = &row[node];
                        Sampler::new(dist.kind, &dist.params).map_err(|reason| {
                            ConfigError::InvalidDistribution {
                                class: ClassId(class),
                                node: NodeId(node),
                                reason,
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NodeSpec {
                    servers,
                    schedule,
                    queue_capacity,
                    samplers,
                    class_change,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            nodes,
            arrival_rates,
            routing,
        })
    }
}

/// Checks that a run horizon is a valid point in simulation time.
pub(crate) fn validate_horizon(horizon: f64) -> Result<(), ConfigError> {
    if horizon >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NegativeHorizon(horizon))
    }
}
