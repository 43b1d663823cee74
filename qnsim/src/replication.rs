use crate::{Network, Result, SimulationBuilder};

use rayon::prelude::*;

/// Runs independent replications of `network` in parallel, one for each seed.
///
/// For every seed, `run` receives a builder already seeded with it, so it can choose further
/// settings before building and running its own simulation. Results are returned in the order
/// of `seeds`.
///
/// # Errors
///
/// Returns the first error, in the order of `seeds`, that any replication failed with.
pub fn replicate<T, F>(network: &Network, seeds: &[u64], run: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(SimulationBuilder<'_>) -> Result<T> + Sync,
{
    seeds
        .par_iter()
        .map(|&seed| {
            log::debug!("Starting replication with seed {}", seed);
            run(SimulationBuilder::new(network).seed(seed))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DistributionConfig, DistributionKind, NetworkConfig, ServersConfig};
    use std::convert::TryFrom;

    #[test]
    fn test_replications_are_independent_and_ordered() -> Result<()> {
        let network = Network::try_from(NetworkConfig {
            arrival_rates: vec![vec![2.0]],
            service_distributions: vec![vec![DistributionConfig::new(
                DistributionKind::Exponential,
                vec![3.0],
            )]],
            servers: vec![ServersConfig::Count(1.0)],
            queue_capacities: None,
            routing: vec![vec![vec![0.0]]],
            class_change: None,
        })?;
        let seeds = [1, 2, 3, 1];
        let sojourns = replicate(&network, &seeds, |builder| {
            let mut simulation = builder.build()?;
            simulation.run_until(100.0)?;
            Ok(simulation.records().map(|r| r.sojourn()).sum::<f64>())
        })?;
        assert_eq!(sojourns.len(), 4);
        assert_eq!(sojourns[0], sojourns[3]);
        assert_ne!(sojourns[0], sojourns[1]);
        assert_ne!(sojourns[1], sojourns[2]);
        Ok(())
    }
}
