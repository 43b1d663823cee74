use crate::{ClassId, CustomerId, Destination, NodeId, RecordError, ServerId};

use serde::Serialize;

/// Immutable summary of a single visit of a customer at a node.
///
/// All derived quantities are computed at construction:
/// `service_end = service_start + service_time`, `wait = service_start - arrival`, and
/// `blocked = exit - service_end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    customer_id: CustomerId,
    class: ClassId,
    node: NodeId,
    arrival: f64,
    wait: f64,
    service_start: f64,
    service_time: f64,
    service_end: f64,
    blocked: f64,
    exit: f64,
    destination: Option<NodeId>,
    queue_size_at_arrival: usize,
    queue_size_at_departure: usize,
}

impl ServiceRecord {
    /// Constructs a record of a visit from its timestamps. Metadata, such as the node and the
    /// customer, are attached with the `with_*` methods.
    ///
    /// # Errors
    ///
    /// Fails when the customer exits before it arrives or before its service ends, when the
    /// service starts before the arrival, or when the service time is negative.
    pub fn new(
        arrival: f64,
        service_start: f64,
        service_time: f64,
        exit: f64,
    ) -> Result<Self, RecordError> {
        if exit < arrival {
            return Err(RecordError::ExitBeforeArrival { arrival, exit });
        }
        if service_time < 0.0 {
            return Err(RecordError::NegativeServiceTime(service_time));
        }
        if service_start < arrival {
            return Err(RecordError::ServiceBeforeArrival {
                arrival,
                service_start,
            });
        }
        let service_end = service_start + service_time;
        if exit < service_end {
            return Err(RecordError::ExitBeforeServiceEnd { service_end, exit });
        }
        Ok(Self {
            customer_id: CustomerId::from(0),
            class: ClassId::from(0),
            node: NodeId::from(0),
            arrival,
            wait: service_start - arrival,
            service_start,
            service_time,
            service_end,
            blocked: exit - service_end,
            exit,
            destination: None,
            queue_size_at_arrival: 0,
            queue_size_at_departure: 0,
        })
    }

    /// Attaches the customer that made the visit.
    #[must_use]
    pub fn with_customer(mut self, customer_id: CustomerId, class: ClassId) -> Self {
        self.customer_id = customer_id;
        self.class = class;
        self
    }

    /// Attaches the node visited.
    #[must_use]
    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = node;
        self
    }

    /// Attaches the destination taken after the visit.
    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination.node();
        self
    }

    /// Attaches the number of customers found at the node on arrival and left behind on exit.
    #[must_use]
    pub fn with_queue_sizes(mut self, at_arrival: usize, at_departure: usize) -> Self {
        self.queue_size_at_arrival = at_arrival;
        self.queue_size_at_departure = at_departure;
        self
    }

    /// The customer that made the visit.
    #[must_use]
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// The class of the customer during the visit.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// The node visited.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Arrival at the node.
    #[must_use]
    pub fn arrival(&self) -> f64 {
        self.arrival
    }

    /// Time spent waiting for a server.
    #[must_use]
    pub fn wait(&self) -> f64 {
        self.wait
    }

    /// Start of service.
    #[must_use]
    pub fn service_start(&self) -> f64 {
        self.service_start
    }

    /// Duration of service.
    #[must_use]
    pub fn service_time(&self) -> f64 {
        self.service_time
    }

    /// End of service.
    #[must_use]
    pub fn service_end(&self) -> f64 {
        self.service_end
    }

    /// Time spent blocked on a server after service, waiting for room downstream.
    #[must_use]
    pub fn blocked(&self) -> f64 {
        self.blocked
    }

    /// Exit from the node.
    #[must_use]
    pub fn exit(&self) -> f64 {
        self.exit
    }

    /// Next node, or `None` if the customer left the network.
    #[must_use]
    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Number of customers present at the node right before the arrival.
    #[must_use]
    pub fn queue_size_at_arrival(&self) -> usize {
        self.queue_size_at_arrival
    }

    /// Number of customers left at the node right after the exit.
    #[must_use]
    pub fn queue_size_at_departure(&self) -> usize {
        self.queue_size_at_departure
    }

    /// Time spent at the node in total.
    #[must_use]
    pub fn sojourn(&self) -> f64 {
        self.exit - self.arrival
    }
}

/// A customer traveling through the network.
///
/// Timestamps refer to the current visit and are reset whenever the customer enters a new node.
/// Finished visits are kept as [`ServiceRecord`]s.
#[derive(Debug, PartialEq)]
pub struct Customer {
    id: CustomerId,
    class: ClassId,
    previous_class: ClassId,
    visit_class: ClassId,
    arrival: Option<f64>,
    service_start: Option<f64>,
    service_time: Option<f64>,
    exit: Option<f64>,
    queue_size_at_arrival: usize,
    server: Option<ServerId>,
    destination: Option<Destination>,
    records: Vec<ServiceRecord>,
}

impl Customer {
    /// Creates a new customer of the given class, not yet in any node.
    #[must_use]
    pub fn new(id: CustomerId, class: ClassId) -> Self {
        Self {
            id,
            class,
            previous_class: class,
            visit_class: class,
            arrival: None,
            service_start: None,
            service_time: None,
            exit: None,
            queue_size_at_arrival: 0,
            server: None,
            destination: None,
            records: Vec::new(),
        }
    }

    /// Unique ID of the customer.
    #[must_use]
    pub fn id(&self) -> CustomerId {
        self.id
    }

    /// Current class.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Class before the most recent class change.
    #[must_use]
    pub fn previous_class(&self) -> ClassId {
        self.previous_class
    }

    /// Arrival at the current node.
    #[must_use]
    pub fn arrival(&self) -> Option<f64> {
        self.arrival
    }

    /// Start of service at the current node.
    #[must_use]
    pub fn service_start(&self) -> Option<f64> {
        self.service_start
    }

    /// Service time sampled for the current node.
    #[must_use]
    pub fn service_time(&self) -> Option<f64> {
        self.service_time
    }

    /// Projected (or actual) end of service at the current node.
    #[must_use]
    pub fn service_end(&self) -> Option<f64> {
        self.service_start
            .zip(self.service_time)
            .map(|(start, duration)| start + duration)
    }

    /// Exit from the network. Only set once the customer reaches the exit node.
    #[must_use]
    pub fn exit(&self) -> Option<f64> {
        self.exit
    }

    /// Server currently holding the customer, if any.
    #[must_use]
    pub fn server(&self) -> Option<ServerId> {
        self.server
    }

    /// Whether the customer finished service but cannot move on.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.destination.is_some()
    }

    /// The node the customer is blocked on.
    #[must_use]
    pub fn blocked_on(&self) -> Option<NodeId> {
        self.destination.and_then(Destination::node)
    }

    /// All finished visits, in the order they happened.
    #[must_use]
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub(crate) fn change_class(&mut self, class: ClassId) {
        self.previous_class = self.class;
        self.class = class;
    }

    pub(crate) fn arrive(&mut self, time: f64, service_time: f64, queue_size: usize) {
        self.arrival = Some(time);
        self.visit_class = self.class;
        self.service_start = None;
        self.service_time = Some(service_time);
        self.queue_size_at_arrival = queue_size;
        self.server = None;
        self.destination = None;
    }

    pub(crate) fn start_service(&mut self, time: f64, server: ServerId) {
        self.service_start = Some(time);
        self.server = Some(server);
    }

    pub(crate) fn block(&mut self, destination: NodeId) {
        self.destination = Some(Destination::Node(destination));
    }

    /// Closes the current visit and stores its record.
    pub(crate) fn finish_visit(
        &mut self,
        node: NodeId,
        exit: f64,
        destination: Destination,
        queue_size: usize,
    ) -> Result<(), RecordError> {
        let arrival = self
            .arrival
            .ok_or(RecordError::MissingTimestamp("arrival"))?;
        let service_start = self
            .service_start
            .ok_or(RecordError::MissingTimestamp("service start"))?;
        let service_time = self
            .service_time
            .ok_or(RecordError::MissingTimestamp("service time"))?;
        let record = ServiceRecord::new(arrival, service_start, service_time, exit)?
            .with_customer(self.id, self.visit_class)
            .with_node(node)
            .with_destination(destination)
            .with_queue_sizes(self.queue_size_at_arrival, queue_size);
        self.records.push(record);
        self.server = None;
        self.destination = None;
        Ok(())
    }

    pub(crate) fn leave(&mut self, time: f64) {
        self.exit = Some(time);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_derived_times() -> Result<(), RecordError> {
        let record = ServiceRecord::new(1.0, 3.0, 2.0, 7.5)?;
        assert_eq!(record.wait(), 2.0);
        assert_eq!(record.service_end(), 5.0);
        assert_eq!(record.blocked(), 2.5);
        assert_eq!(record.sojourn(), 6.5);
        assert_eq!(record.destination(), None);
        Ok(())
    }

    #[test]
    fn test_record_rejects_invalid_times() {
        assert_eq!(
            ServiceRecord::new(2.0, 2.0, 0.0, 1.0),
            Err(RecordError::ExitBeforeArrival {
                arrival: 2.0,
                exit: 1.0
            })
        );
        assert_eq!(
            ServiceRecord::new(0.0, 0.0, -1.0, 1.0),
            Err(RecordError::NegativeServiceTime(-1.0))
        );
        assert_eq!(
            ServiceRecord::new(0.0, 1.0, 1.0, 1.5),
            Err(RecordError::ExitBeforeServiceEnd {
                service_end: 2.0,
                exit: 1.5
            })
        );
    }

    #[test]
    fn test_customer_visit() {
        let mut customer = Customer::new(CustomerId::from(3), ClassId::from(1));
        customer.arrive(1.0, 0.5, 2);
        assert_eq!(customer.service_end(), None);
        customer.start_service(2.0, ServerId::from(4));
        assert_eq!(customer.service_end(), Some(2.5));
        assert_eq!(customer.server(), Some(ServerId::from(4)));
        customer.block(NodeId::from(1));
        assert!(customer.is_blocked());
        assert_eq!(customer.blocked_on(), Some(NodeId::from(1)));
        customer
            .finish_visit(NodeId::from(0), 3.0, Destination::Node(NodeId::from(1)), 1)
            .unwrap();
        assert!(!customer.is_blocked());
        assert_eq!(customer.server(), None);
        let record = &customer.records()[0];
        assert_eq!(record.customer_id(), CustomerId::from(3));
        assert_eq!(record.node(), NodeId::from(0));
        assert_eq!(record.destination(), Some(NodeId::from(1)));
        assert_eq!(record.wait(), 1.0);
        assert_eq!(record.blocked(), 0.5);
        assert_eq!(record.queue_size_at_arrival(), 2);
        assert_eq!(record.queue_size_at_departure(), 1);
    }

    #[test]
    fn test_record_keeps_class_of_visit() -> Result<(), RecordError> {
        let mut customer = Customer::new(CustomerId::from(0), ClassId::from(0));
        customer.arrive(0.0, 1.0, 0);
        customer.start_service(0.0, ServerId::from(0));
        customer.change_class(ClassId::from(2));
        customer.finish_visit(NodeId::from(0), 1.0, Destination::Node(NodeId::from(1)), 0)?;
        customer.arrive(1.0, 1.0, 0);
        customer.start_service(1.0, ServerId::from(1));
        customer.finish_visit(NodeId::from(1), 2.0, Destination::Exit, 0)?;
        let classes: Vec<_> = customer.records().iter().map(ServiceRecord::class).collect();
        assert_eq!(classes, vec![ClassId::from(0), ClassId::from(2)]);
        assert_eq!(customer.class(), ClassId::from(2));
        Ok(())
    }

    #[test]
    fn test_finish_visit_without_service() {
        let mut customer = Customer::new(CustomerId::from(0), ClassId::from(0));
        customer.arrive(1.0, 0.5, 0);
        assert_eq!(
            customer.finish_visit(NodeId::from(0), 2.0, Destination::Exit, 0),
            Err(RecordError::MissingTimestamp("service start"))
        );
    }
}
