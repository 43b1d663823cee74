use crate::{Customer, ServiceRecord};

/// Sink absorbing customers that leave the network.
#[derive(Debug, Default)]
pub struct ExitNode {
    customers: Vec<Customer>,
}

impl ExitNode {
    /// Takes a departing customer, stamping its exit time.
    pub fn accept(&mut self, mut customer: Customer, time: f64) {
        log::trace!("[{}] Customer {} leaves the network", time, customer.id());
        customer.leave(time);
        self.customers.push(customer);
    }

    /// Never schedules anything.
    #[must_use]
    pub fn next_event_time(&self) -> f64 {
        f64::INFINITY
    }

    /// Customers that left the network, in the order of departure.
    #[must_use]
    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    /// Number of customers that left the network.
    #[must_use]
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    /// Whether no customer has left yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Visit records of all departed customers.
    pub fn records(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.customers.iter().flat_map(|c| c.records().iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ClassId, CustomerId};

    #[test]
    fn test_exit() {
        let mut exit = ExitNode::default();
        assert!(exit.is_empty());
        assert_eq!(exit.next_event_time(), f64::INFINITY);
        exit.accept(Customer::new(CustomerId::from(3), ClassId::from(0)), 2.5);
        assert_eq!(exit.len(), 1);
        assert_eq!(exit.customers()[0].exit(), Some(2.5));
        assert_eq!(exit.records().count(), 0);
    }
}
