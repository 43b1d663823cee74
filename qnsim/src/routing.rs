//! Routing policies deciding where a customer goes after service.

use crate::{ClassId, ConfigError, Destination, Network, NodeId, SimRng};

use ndarray::Array2;
use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::Distribution;

/// Implementors choose the next destination of a customer that finished service.
pub trait Route {
    /// Chooses the destination of a `class` customer leaving `node`. `occupancy` holds the
    /// current number of customers at each node.
    fn route(
        &mut self,
        node: NodeId,
        class: ClassId,
        occupancy: &[usize],
        rng: &mut SimRng,
    ) -> Destination;
}

/// Routes by the probabilities of the routing matrices; the remaining probability mass of a
/// row is the probability of leaving the network.
pub struct ProbabilisticRouting {
    num_nodes: usize,
    // Indexed by `class * num_nodes + node`. The last outcome of each index means exit.
    distributions: Vec<WeightedIndex<f64>>,
}

impl ProbabilisticRouting {
    /// Resolves routing distributions of all classes and nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if a routing row does not define a distribution.
    pub fn new(network: &Network) -> Result<Self, ConfigError> {
        let num_nodes = network.num_nodes();
        let mut distributions = Vec::with_capacity(network.num_classes() * num_nodes);
        for class in (0..network.num_classes()).map(ClassId::from) {
            for node in (0..num_nodes).map(NodeId::from) {
                let row = network.routing_row(class, node);
                let exit = network.exit_probability(class, node);
                let dist = WeightedIndex::new(row.iter().copied().chain(std::iter::once(exit)))
                    .map_err(|_| ConfigError::RoutingRowSum {
                        class,
                        node,
                        sum: row.sum(),
                    })?;
                distributions.push(dist);
            }
        }
        Ok(Self {
            num_nodes,
            distributions,
        })
    }
}

impl Route for ProbabilisticRouting {
    fn route(
        &mut self,
        node: NodeId,
        class: ClassId,
        _: &[usize],
        rng: &mut SimRng,
    ) -> Destination {
        let idx = usize::from(class) * self.num_nodes + usize::from(node);
        let outcome = self.distributions[idx].sample(rng);
        if outcome == self.num_nodes {
            Destination::Exit
        } else {
            Destination::Node(NodeId::from(outcome))
        }
    }
}

/// Adaptive routing: leaves the network with the exit probability of the routing row, and
/// otherwise joins the least occupied node among those reachable with non-zero probability.
/// Ties go to the node with the lowest ID.
pub struct ShortestQueueRouting {
    routing: Vec<Array2<f64>>,
}

impl ShortestQueueRouting {
    /// Takes reachability and exit probabilities from the routing matrices of `network`.
    #[must_use]
    pub fn new(network: &Network) -> Self {
        let num_nodes = network.num_nodes();
        let routing = (0..network.num_classes())
            .map(|class| {
                Array2::from_shape_fn((num_nodes, num_nodes), |(from, to)| {
                    network.routing_row(ClassId::from(class), NodeId::from(from))[to]
                })
            })
            .collect();
        Self { routing }
    }
}

impl Route for ShortestQueueRouting {
    fn route(
        &mut self,
        node: NodeId,
        class: ClassId,
        occupancy: &[usize],
        rng: &mut SimRng,
    ) -> Destination {
        let row = self.routing[usize::from(class)].row(usize::from(node));
        let exit = (1.0 - row.sum()).max(0.0);
        if exit > 0.0 && rng.gen::<f64>() < exit {
            return Destination::Exit;
        }
        row.iter()
            .enumerate()
            .filter(|(_, p)| **p > 0.0)
            .min_by_key(|&(dest, _)| (occupancy[dest], dest))
            .map_or(Destination::Exit, |(dest, _)| {
                Destination::Node(NodeId::from(dest))
            })
    }
}
