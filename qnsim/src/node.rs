use crate::{
    ClassId, ConfigError, Customer, Destination, Error, InvariantViolation, NodeId, NodeSpec,
    Sampler, Schedule, ServerId, ShiftCursor, SimRng,
};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use ordered_float::OrderedFloat;
use rand::distributions::WeightedIndex;
use rand_distr::Distribution;

/// Node events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The duty schedule moves to the next shift.
    ShiftChange,
    /// The earliest service in progress finishes.
    Release,
}

/// A unit of service capacity of a node.
///
/// A server is idle when it holds no customer; otherwise it is either busy serving the customer,
/// or blocked, holding a served customer that cannot move to its next node.
#[derive(Debug)]
pub struct Server {
    id: ServerId,
    customer: Option<Customer>,
    off_duty: bool,
}

impl Server {
    fn new(id: ServerId) -> Self {
        Self {
            id,
            customer: None,
            off_duty: false,
        }
    }

    /// Network-wide ID of the server.
    #[must_use]
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Customer held by the server.
    #[must_use]
    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    /// No customer at the server.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.customer.is_none()
    }

    /// Holding a customer that is done with service but cannot move on.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.customer.as_ref().map_or(false, Customer::is_blocked)
    }

    /// Currently not accepting new customers due to the duty schedule.
    #[must_use]
    pub fn is_off_duty(&self) -> bool {
        self.off_duty
    }
}

/// Upstream server blocked while waiting to enter a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BlockedEntry {
    pub(crate) node: NodeId,
    pub(crate) slot: usize,
    pub(crate) server: ServerId,
}

/// A service station with a bank of servers and a FIFO waiting room.
///
/// Customers in service are tracked in a min-heap keyed by their projected end of service, so
/// the next release is always at the top. Customers whose service has ended but who are
/// blocked stay at their servers and are no longer in the heap.
pub struct Node {
    id: NodeId,
    servers: Vec<Server>,
    waiting: VecDeque<Customer>,
    completions: BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>>,
    queue_capacity: Option<usize>,
    samplers: Vec<Sampler>,
    class_change: Option<Vec<WeightedIndex<f64>>>,
    schedule: Option<Schedule>,
    shift: ShiftCursor,
    next_shift: f64,
    blocked_upstream: VecDeque<BlockedEntry>,
}

impl Node {
    /// Constructs a node from its validated definition. Its servers are assigned consecutive
    /// IDs starting from `first_server`.
    ///
    /// # Errors
    ///
    /// Returns an error if a class change matrix cannot be turned into distributions.
    pub fn new(id: NodeId, spec: &NodeSpec, first_server: ServerId) -> Result<Self, ConfigError> {
        let first = usize::from(first_server);
        let class_change = spec
            .class_change
            .as_ref()
            .map(|matrix| {
                matrix
                    .outer_iter()
                    .enumerate()
                    .map(|(class, row)| {
                        WeightedIndex::new(row.iter().copied()).map_err(|_| {
                            ConfigError::ClassChangeRowSum {
                                class: ClassId::from(class),
                                node: id,
                                sum: row.sum(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let mut node = Self {
            id,
            servers: (first..first + spec.servers)
                .map(|s| Server::new(ServerId::from(s)))
                .collect(),
            waiting: VecDeque::new(),
            completions: BinaryHeap::new(),
            queue_capacity: spec.queue_capacity,
            samplers: spec.samplers.clone(),
            class_change,
            schedule: spec.schedule.clone(),
            shift: ShiftCursor::default(),
            next_shift: f64::INFINITY,
            blocked_upstream: VecDeque::new(),
        };
        node.enter_shift(ShiftCursor::default(), 0.0);
        Ok(node)
    }

    /// Node ID.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The server bank.
    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// IDs of all servers of this node.
    pub fn server_ids(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.servers.iter().map(Server::id)
    }

    pub(crate) fn server_id(&self, slot: usize) -> ServerId {
        self.servers[slot].id
    }

    /// Customers waiting for a server, in the order they will be served.
    pub fn waiting(&self) -> impl Iterator<Item = &Customer> {
        self.waiting.iter()
    }

    /// Customers at the servers, either in service or blocked.
    pub fn at_servers(&self) -> impl Iterator<Item = &Customer> {
        self.servers.iter().filter_map(Server::customer)
    }

    /// Number of customers present at the node.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.waiting.len() + self.servers.iter().filter(|s| !s.is_idle()).count()
    }

    /// Number of customers in service, not counting blocked ones.
    #[must_use]
    pub fn in_service(&self) -> usize {
        self.completions.len()
    }

    /// Number of customers blocked at this node's servers.
    #[must_use]
    pub fn num_blocked(&self) -> usize {
        self.servers.iter().filter(|s| s.is_blocked()).count()
    }

    /// Maximum number of customers present at once, `None` if unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.queue_capacity.map(|q| q + self.servers.len())
    }

    /// Whether another customer can enter the node.
    #[must_use]
    pub fn has_space(&self) -> bool {
        self.capacity().map_or(true, |c| self.occupancy() < c)
    }

    /// The time and type of the next event at this node, if any is scheduled.
    /// A shift change goes first if both happen at the same time.
    #[must_use]
    pub fn next_event(&self) -> Option<(f64, NodeEvent)> {
        let release = self
            .completions
            .peek()
            .map(|Reverse((time, _))| (time.into_inner(), NodeEvent::Release));
        let shift = if self.next_shift.is_finite() {
            Some((self.next_shift, NodeEvent::ShiftChange))
        } else {
            None
        };
        match (shift, release) {
            (Some(s), Some(r)) => Some(if s.0 <= r.0 { s } else { r }),
            (s, r) => s.or(r),
        }
    }

    /// The time of the next event at this node, infinite if nothing is scheduled.
    #[must_use]
    pub fn next_event_time(&self) -> f64 {
        self.next_event().map_or(f64::INFINITY, |(time, _)| time)
    }

    /// Admits `customer` at `time`, sampling its service time. The customer starts service
    /// right away if an on-duty server is idle, and joins the waiting line otherwise.
    ///
    /// # Errors
    ///
    /// Returns the customer back if the node is full.
    pub fn accept(
        &mut self,
        mut customer: Customer,
        time: f64,
        rng: &mut SimRng,
    ) -> Result<(), Customer> {
        if !self.has_space() {
            return Err(customer);
        }
        let service_time = self.samplers[usize::from(customer.class())].sample(rng);
        customer.arrive(time, service_time, self.occupancy());
        match self.free_server() {
            Some(slot) => self.start(slot, customer, time),
            None => self.waiting.push_back(customer),
        }
        debug_assert!(self.capacity().map_or(true, |c| self.occupancy() <= c));
        debug_assert!(self.in_service() <= self.servers.len());
        Ok(())
    }

    fn free_server(&self) -> Option<usize> {
        self.servers
            .iter()
            .position(|s| s.is_idle() && !s.off_duty)
    }

    fn start(&mut self, slot: usize, mut customer: Customer, time: f64) {
        let server = &mut self.servers[slot];
        customer.start_service(time, server.id);
        let end = customer.service_end().unwrap_or(time);
        log::trace!(
            "[{}] Customer {} starts service at node {} server {}",
            time,
            customer.id(),
            self.id,
            server.id
        );
        server.customer = Some(customer);
        self.completions.push(Reverse((OrderedFloat(end), slot)));
    }

    /// Hands idle on-duty servers to waiting customers.
    fn serve_waiting(&mut self, time: f64) {
        while !self.waiting.is_empty() {
            match self.free_server() {
                Some(slot) => {
                    if let Some(customer) = self.waiting.pop_front() {
                        self.start(slot, customer, time);
                    }
                }
                None => break,
            }
        }
    }

    /// Removes the earliest service completion and returns the slot of its server.
    /// The customer stays at the server until it is released or blocked.
    ///
    /// # Errors
    ///
    /// Fails if nobody is in service; a node never schedules a release in that case.
    pub(crate) fn finish_service(&mut self) -> Result<usize, InvariantViolation> {
        self.completions
            .pop()
            .map(|Reverse((_, slot))| slot)
            .ok_or(InvariantViolation::EmptyRelease(self.id))
    }

    /// The customer at the server in `slot`.
    pub(crate) fn customer_at(&self, slot: usize) -> Result<&Customer, InvariantViolation> {
        self.servers[slot]
            .customer
            .as_ref()
            .ok_or_else(|| InvariantViolation::EmptyServer(self.servers[slot].id))
    }

    /// Draws a new class for the customer at `slot` if this node changes classes.
    pub(crate) fn change_class(
        &mut self,
        slot: usize,
        rng: &mut SimRng,
    ) -> Result<ClassId, InvariantViolation> {
        let server_id = self.servers[slot].id;
        let customer = self.servers[slot]
            .customer
            .as_mut()
            .ok_or(InvariantViolation::EmptyServer(server_id))?;
        if let Some(dists) = &self.class_change {
            let class = ClassId::from(dists[usize::from(customer.class())].sample(rng));
            if class != customer.class() {
                log::debug!(
                    "Customer {} changes class {} -> {} at node {}",
                    customer.id(),
                    customer.class(),
                    class,
                    self.id
                );
            }
            customer.change_class(class);
        }
        Ok(customer.class())
    }

    /// Marks the customer at `slot` as blocked on `destination`.
    pub(crate) fn block(
        &mut self,
        slot: usize,
        destination: NodeId,
    ) -> Result<ServerId, InvariantViolation> {
        let server = &mut self.servers[slot];
        let customer = server
            .customer
            .as_mut()
            .ok_or(InvariantViolation::EmptyServer(server.id))?;
        customer.block(destination);
        Ok(server.id)
    }

    /// Detaches the customer at `slot` leaving for `destination` at `time`, and closes its visit
    /// record. The freed server immediately picks up the next waiting customer if on duty.
    pub(crate) fn release(
        &mut self,
        slot: usize,
        time: f64,
        destination: Destination,
    ) -> Result<Customer, Error> {
        let server_id = self.servers[slot].id;
        let mut customer = self.servers[slot]
            .customer
            .take()
            .ok_or(InvariantViolation::EmptyServer(server_id))?;
        customer.finish_visit(self.id, time, destination, self.occupancy())?;
        log::trace!(
            "[{}] Customer {} leaves node {} for {:?}",
            time,
            customer.id(),
            self.id,
            destination
        );
        self.serve_waiting(time);
        Ok(customer)
    }

    /// Moves on to the next shift that ends after `time`: the first `k` servers are on duty,
    /// where `k` is given by the schedule. Servers going off duty finish their current customers.
    pub(crate) fn change_shift(&mut self, time: f64) {
        let cursor = match &self.schedule {
            Some(schedule) => {
                let mut cursor = schedule.advance(self.shift);
                while schedule.shift(cursor).1 <= time {
                    cursor = schedule.advance(cursor);
                }
                cursor
            }
            None => return,
        };
        self.enter_shift(cursor, time);
    }

    fn enter_shift(&mut self, cursor: ShiftCursor, time: f64) {
        let (on_duty, next_shift) = match &self.schedule {
            Some(schedule) => schedule.shift(cursor),
            None => return,
        };
        log::debug!(
            "[{}] Node {} changes shift: {} servers on duty until {}",
            time,
            self.id,
            on_duty,
            next_shift
        );
        for (idx, server) in self.servers.iter_mut().enumerate() {
            server.off_duty = idx >= on_duty;
        }
        self.shift = cursor;
        self.next_shift = next_shift;
        self.serve_waiting(time);
    }

    pub(crate) fn push_blocked(&mut self, entry: BlockedEntry) {
        self.blocked_upstream.push_back(entry);
    }

    pub(crate) fn pop_blocked(&mut self) -> Option<BlockedEntry> {
        self.blocked_upstream.pop_front()
    }

    /// Servers of other nodes holding customers blocked on this node, in FIFO order.
    pub fn blocked_upstream(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.blocked_upstream.iter().map(|e| e.server)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CustomerId, DistributionKind};
    use rand_chacha::rand_core::SeedableRng;

    fn spec(servers: usize, queue_capacity: Option<usize>, service: f64) -> NodeSpec {
        NodeSpec {
            servers,
            schedule: None,
            queue_capacity,
            samplers: vec![Sampler::new(DistributionKind::Deterministic, &[service]).unwrap()],
            class_change: None,
        }
    }

    fn customer(id: usize) -> Customer {
        Customer::new(CustomerId::from(id), ClassId::from(0))
    }

    #[test]
    fn test_accept_and_release() -> Result<(), Error> {
        let mut rng = SimRng::seed_from_u64(0);
        let mut node = Node::new(NodeId::from(0), &spec(2, Some(1), 1.0), ServerId::from(5))?;
        assert_eq!(node.capacity(), Some(3));
        assert_eq!(node.next_event(), None);
        assert_eq!(node.next_event_time(), f64::INFINITY);

        assert!(node.accept(customer(0), 0.0, &mut rng).is_ok());
        assert!(node.accept(customer(1), 0.5, &mut rng).is_ok());
        assert!(node.accept(customer(2), 0.7, &mut rng).is_ok());
        assert_eq!(node.occupancy(), 3);
        assert_eq!(node.in_service(), 2);
        assert!(!node.has_space());
        let rejected = node.accept(customer(3), 0.8, &mut rng).unwrap_err();
        assert_eq!(rejected.id(), CustomerId::from(3));

        assert_eq!(node.next_event(), Some((1.0, NodeEvent::Release)));
        let slot = node.finish_service()?;
        assert_eq!(node.server_id(slot), ServerId::from(5));
        let leaving = node.release(slot, 1.0, Destination::Exit)?;
        assert_eq!(leaving.id(), CustomerId::from(0));
        assert_eq!(leaving.records()[0].wait(), 0.0);
        assert_eq!(leaving.records()[0].queue_size_at_departure(), 2);

        // Customer 2 takes over the freed server.
        assert_eq!(node.in_service(), 2);
        assert_eq!(node.next_event(), Some((1.5, NodeEvent::Release)));
        let slot = node.finish_service()?;
        let leaving = node.release(slot, 1.5, Destination::Exit)?;
        assert_eq!(leaving.id(), CustomerId::from(1));
        let slot = node.finish_service()?;
        let leaving = node.release(slot, 2.0, Destination::Exit)?;
        assert!(float_cmp::approx_eq!(
            f64,
            leaving.records()[0].wait(),
            0.3,
            epsilon = 1e-9
        ));
        assert_eq!(node.occupancy(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_release() {
        let mut node = Node::new(NodeId::from(4), &spec(1, None, 1.0), ServerId::from(0)).unwrap();
        assert_eq!(
            node.finish_service(),
            Err(InvariantViolation::EmptyRelease(NodeId::from(4)))
        );
    }

    #[test]
    fn test_blocked_customer_keeps_server() -> Result<(), Error> {
        let mut rng = SimRng::seed_from_u64(0);
        let mut node = Node::new(NodeId::from(0), &spec(1, Some(1), 1.0), ServerId::from(0))?;
        assert!(node.accept(customer(0), 0.0, &mut rng).is_ok());
        assert!(node.accept(customer(1), 0.0, &mut rng).is_ok());
        let slot = node.finish_service()?;
        assert_eq!(node.block(slot, NodeId::from(1))?, ServerId::from(0));
        assert_eq!(node.num_blocked(), 1);
        assert_eq!(node.in_service(), 0);
        assert_eq!(node.occupancy(), 2);
        assert_eq!(node.next_event(), None);
        let leaving = node.release(slot, 3.0, Destination::Node(NodeId::from(1)))?;
        assert_eq!(leaving.records()[0].blocked(), 2.0);
        assert_eq!(node.num_blocked(), 0);
        assert_eq!(node.next_event(), Some((4.0, NodeEvent::Release)));
        Ok(())
    }

    #[test]
    fn test_duty_schedule() -> Result<(), Error> {
        let mut rng = SimRng::seed_from_u64(0);
        let mut spec = spec(2, None, 4.0);
        spec.schedule = Some(Schedule::new(vec![(1, 2.0), (2, 5.0)]).unwrap());
        let mut node = Node::new(NodeId::from(0), &spec, ServerId::from(0))?;
        assert!(node.servers()[1].is_off_duty());
        assert!(node.accept(customer(0), 0.0, &mut rng).is_ok());
        assert!(node.accept(customer(1), 1.0, &mut rng).is_ok());
        assert_eq!(node.in_service(), 1);
        assert_eq!(node.next_event(), Some((2.0, NodeEvent::ShiftChange)));

        node.change_shift(2.0);
        assert!(!node.servers()[1].is_off_duty());
        assert_eq!(node.in_service(), 2);
        assert_eq!(node.next_event(), Some((4.0, NodeEvent::Release)));

        let slot = node.finish_service()?;
        node.release(slot, 4.0, Destination::Exit)?;
        assert_eq!(node.next_event(), Some((5.0, NodeEvent::ShiftChange)));

        // Server 1 goes off duty but finishes its customer.
        node.change_shift(5.0);
        assert!(node.servers()[1].is_off_duty());
        assert_eq!(node.in_service(), 1);
        assert_eq!(node.next_event(), Some((6.0, NodeEvent::Release)));
        Ok(())
    }

    #[test]
    fn test_fractional_schedule_cycles() -> Result<(), Error> {
        let mut spec = spec(2, None, 1.0);
        spec.schedule = Some(Schedule::new(vec![(1, 0.1), (2, 0.3)]).unwrap());
        let mut node = Node::new(NodeId::from(0), &spec, ServerId::from(0))?;
        let mut previous = 0.0;
        for change in 0..1_000 {
            let (time, event) = node.next_event().unwrap();
            assert_eq!(event, NodeEvent::ShiftChange);
            assert!(time > previous);
            node.change_shift(time);
            assert_eq!(node.servers()[1].is_off_duty(), change % 2 == 1);
            previous = time;
        }
        assert!(previous > 149.0);
        Ok(())
    }

    #[test]
    fn test_class_change() -> Result<(), Error> {
        let mut rng = SimRng::seed_from_u64(0);
        let mut spec = spec(1, None, 1.0);
        spec.samplers.push(spec.samplers[0]);
        spec.class_change = Some(ndarray::arr2(&[[0.0, 1.0], [0.0, 1.0]]));
        let mut node = Node::new(NodeId::from(0), &spec, ServerId::from(0))?;
        assert!(node.accept(customer(0), 0.0, &mut rng).is_ok());
        let slot = node.finish_service()?;
        assert_eq!(node.change_class(slot, &mut rng)?, ClassId::from(1));
        assert_eq!(node.customer_at(slot)?.previous_class(), ClassId::from(0));
        let leaving = node.release(slot, 1.0, Destination::Exit)?;
        assert_eq!(leaving.class(), ClassId::from(1));
        assert_eq!(leaving.records()[0].class(), ClassId::from(0));
        Ok(())
    }
}
