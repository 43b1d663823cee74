use crate::{ClassId, Customer, CustomerId, Network, NodeId, SimRng};

use rand::distributions::WeightedIndex;
use rand_distr::{Distribution, Exp};

/// Source of exogenous arrivals.
///
/// Arrivals of all classes at all nodes form a single Poisson process with the aggregate rate.
/// Each arrival first draws its class with probability proportional to the class's total rate,
/// and then its destination with probability proportional to the class's rate at each node.
pub struct ArrivalNode {
    rate: f64,
    interarrival: Option<Exp<f64>>,
    classes: Option<WeightedIndex<f64>>,
    destinations: Vec<Option<WeightedIndex<f64>>>,
    next_time: f64,
    next_customer: usize,
    accepted: usize,
    rejections: Vec<Vec<usize>>,
}

impl ArrivalNode {
    /// Constructs the arrival process of `network` and schedules the first arrival.
    pub fn new(network: &Network, rng: &mut SimRng) -> Self {
        let rates = network.arrival_rates();
        let class_rates: Vec<f64> = rates.outer_iter().map(|row| row.sum()).collect();
        let rate: f64 = class_rates.iter().sum();
        let interarrival = if rate > 0.0 {
            Exp::new(rate).ok()
        } else {
            None
        };
        let classes = WeightedIndex::new(&class_rates).ok();
        let destinations = rates
            .outer_iter()
            .map(|row| WeightedIndex::new(row.iter().copied()).ok())
            .collect();
        let mut node = Self {
            rate,
            interarrival,
            classes,
            destinations,
            next_time: 0.0,
            next_customer: 0,
            accepted: 0,
            rejections: vec![vec![0; network.num_classes()]; network.num_nodes()],
        };
        node.advance(rng);
        node
    }

    fn advance(&mut self, rng: &mut SimRng) {
        self.next_time = match &self.interarrival {
            Some(dist) => self.next_time + dist.sample(rng),
            None => f64::INFINITY,
        };
    }

    /// Aggregate arrival rate.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Time of the next arrival, infinite if there are no arrivals at all.
    #[must_use]
    pub fn next_event_time(&self) -> f64 {
        self.next_time
    }

    /// Generates the customer arriving at the current event time along with its destination,
    /// and schedules the next arrival.
    pub fn fire(&mut self, rng: &mut SimRng) -> Option<(Customer, NodeId)> {
        let class = self.classes.as_ref()?.sample(rng);
        let node = self.destinations[class].as_ref()?.sample(rng);
        let customer = Customer::new(CustomerId::from(self.next_customer), ClassId::from(class));
        self.next_customer += 1;
        self.advance(rng);
        Some((customer, NodeId::from(node)))
    }

    pub(crate) fn accept(&mut self) {
        self.accepted += 1;
    }

    pub(crate) fn reject(&mut self, node: NodeId, class: ClassId) {
        self.rejections[usize::from(node)][usize::from(class)] += 1;
    }

    /// Number of customers generated so far, accepted or not.
    #[must_use]
    pub fn generated(&self) -> usize {
        self.next_customer
    }

    /// Number of generated customers that entered the network.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Number of `class` arrivals dropped because `node` was full.
    #[must_use]
    pub fn rejections(&self, node: NodeId, class: ClassId) -> usize {
        self.rejections[usize::from(node)][usize::from(class)]
    }

    /// Rejection counts indexed by node, then class.
    #[must_use]
    pub fn rejection_table(&self) -> &[Vec<usize>] {
        &self.rejections
    }

    /// Total number of dropped arrivals.
    #[must_use]
    pub fn total_rejections(&self) -> usize {
        self.rejections.iter().flatten().sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DistributionConfig, DistributionKind, NetworkConfig, ServersConfig};
    use float_cmp::approx_eq;
    use rand_chacha::rand_core::SeedableRng;
    use std::convert::TryFrom;

    fn network(arrival_rates: Vec<Vec<f64>>) -> Network {
        let exp = DistributionConfig::new(DistributionKind::Exponential, vec![1.0]);
        Network::try_from(NetworkConfig {
            service_distributions: vec![vec![exp; 2]; arrival_rates.len()],
            routing: vec![vec![vec![0.0; 2]; 2]; arrival_rates.len()],
            arrival_rates,
            servers: vec![ServersConfig::Count(1.0); 2],
            queue_capacities: None,
            class_change: None,
        })
        .unwrap()
    }

    #[test]
    fn test_no_arrivals() {
        let mut rng = SimRng::seed_from_u64(0);
        let mut arrivals = ArrivalNode::new(&network(vec![vec![0.0, 0.0]]), &mut rng);
        assert_eq!(arrivals.next_event_time(), f64::INFINITY);
        assert!(arrivals.fire(&mut rng).is_none());
    }

    #[test]
    fn test_class_and_destination_frequencies() {
        let mut rng = SimRng::seed_from_u64(1);
        let mut arrivals =
            ArrivalNode::new(&network(vec![vec![1.0, 0.0], vec![1.0, 2.0]]), &mut rng);
        assert_eq!(arrivals.rate(), 4.0);
        let n = 40_000;
        let mut counts = [[0_usize; 2]; 2];
        let mut previous = 0.0;
        for id in 0..n {
            let time = arrivals.next_event_time();
            assert!(time >= previous);
            previous = time;
            let (customer, node) = arrivals.fire(&mut rng).unwrap();
            assert_eq!(customer.id(), CustomerId::from(id));
            counts[usize::from(customer.class())][usize::from(node)] += 1;
        }
        assert_eq!(arrivals.generated(), n);
        assert_eq!(counts[0][1], 0);
        let share = |c: usize| c as f64 / n as f64;
        assert!(approx_eq!(f64, share(counts[0][0]), 0.25, epsilon = 0.01));
        assert!(approx_eq!(f64, share(counts[1][0]), 0.25, epsilon = 0.01));
        assert!(approx_eq!(f64, share(counts[1][1]), 0.5, epsilon = 0.01));
        // Mean interarrival time is 1 / 4.
        assert!(approx_eq!(f64, previous / n as f64, 0.25, epsilon = 0.01));
    }

    #[test]
    fn test_rejection_counts() {
        let mut rng = SimRng::seed_from_u64(1);
        let mut arrivals = ArrivalNode::new(&network(vec![vec![1.0, 1.0]]), &mut rng);
        arrivals.reject(NodeId::from(1), ClassId::from(0));
        arrivals.reject(NodeId::from(1), ClassId::from(0));
        arrivals.accept();
        assert_eq!(arrivals.rejections(NodeId::from(1), ClassId::from(0)), 2);
        assert_eq!(arrivals.rejections(NodeId::from(0), ClassId::from(0)), 0);
        assert_eq!(arrivals.total_rejections(), 2);
        assert_eq!(arrivals.accepted(), 1);
    }
}
