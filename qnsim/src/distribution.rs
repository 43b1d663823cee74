use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Exp, Gamma, LogNormal, Normal, Triangular, Weibull};
use serde::{Deserialize, Serialize};

/// Type of a service time distribution.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, strum::EnumString, strum::ToString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DistributionKind {
    /// Parameters: `[rate]`.
    Exponential,
    /// Parameters: `[lower, upper]`.
    Uniform,
    /// Parameters: `[value]`.
    Deterministic,
    /// Parameters: `[lower, mode, upper]`.
    Triangular,
    /// Parameters: `[shape, scale]`.
    Gamma,
    /// Parameters: `[mean, standard deviation]`. Negative samples are truncated to zero.
    Normal,
    /// Parameters: `[mu, sigma]` of the underlying normal distribution.
    Lognormal,
    /// Parameters: `[scale, shape]`.
    Weibull,
}

impl DistributionKind {
    /// Number of parameters this kind of distribution expects.
    #[must_use]
    pub fn num_params(self) -> usize {
        match self {
            Self::Exponential | Self::Deterministic => 1,
            Self::Uniform | Self::Gamma | Self::Normal | Self::Lognormal | Self::Weibull => 2,
            Self::Triangular => 3,
        }
    }
}

/// A resolved distribution that samples non-negative durations.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    /// Exponential distribution.
    Exponential(Exp<f64>),
    /// Continuous uniform distribution.
    Uniform(Uniform<f64>),
    /// Always the same value.
    Deterministic(f64),
    /// Triangular distribution.
    Triangular(Triangular<f64>),
    /// Gamma distribution.
    Gamma(Gamma<f64>),
    /// Normal distribution truncated at zero.
    Normal(Normal<f64>),
    /// Log-normal distribution.
    Lognormal(LogNormal<f64>),
    /// Weibull distribution.
    Weibull(Weibull<f64>),
}

fn non_negative(name: &str, value: f64) -> Result<f64, String> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("{} must be a finite non-negative number, got {}", name, value))
    }
}

impl Sampler {
    /// Resolves a distribution of the given kind with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the number of parameters does not match the kind,
    /// or if the parameters do not define a valid distribution of non-negative durations.
    pub fn new(kind: DistributionKind, params: &[f64]) -> Result<Self, String> {
        if params.len() != kind.num_params() {
            return Err(format!(
                "{} expects {} parameters but {} were given",
                kind.to_string(),
                kind.num_params(),
                params.len()
            ));
        }
        match kind {
            DistributionKind::Exponential => {
                let rate = params[0];
                if !(rate.is_finite() && rate > 0.0) {
                    return Err(format!("rate must be positive, got {}", rate));
                }
                Exp::new(rate)
                    .map(Self::Exponential)
                    .map_err(|e| format!("{:?}", e))
            }
            DistributionKind::Uniform => {
                let lower = non_negative("lower bound", params[0])?;
                let upper = non_negative("upper bound", params[1])?;
                if lower > upper {
                    return Err(format!(
                        "lower bound {} exceeds upper bound {}",
                        lower, upper
                    ));
                }
                Ok(Self::Uniform(Uniform::new_inclusive(lower, upper)))
            }
            DistributionKind::Deterministic => {
                non_negative("value", params[0]).map(Self::Deterministic)
            }
            DistributionKind::Triangular => {
                let lower = non_negative("lower bound", params[0])?;
                let mode = params[1];
                let upper = params[2];
                Triangular::new(lower, upper, mode)
                    .map(Self::Triangular)
                    .map_err(|e| format!("{:?}", e))
            }
            DistributionKind::Gamma => Gamma::new(params[0], params[1])
                .map(Self::Gamma)
                .map_err(|e| format!("{:?}", e)),
            DistributionKind::Normal => Normal::new(params[0], params[1])
                .map(Self::Normal)
                .map_err(|e| format!("{:?}", e)),
            DistributionKind::Lognormal => LogNormal::new(params[0], params[1])
                .map(Self::Lognormal)
                .map_err(|e| format!("{:?}", e)),
            DistributionKind::Weibull => Weibull::new(params[0], params[1])
                .map(Self::Weibull)
                .map_err(|e| format!("{:?}", e)),
        }
    }
}

impl Distribution<f64> for Sampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Exponential(d) => d.sample(rng),
            Self::Uniform(d) => d.sample(rng),
            Self::Deterministic(value) => *value,
            Self::Triangular(d) => d.sample(rng),
            Self::Gamma(d) => d.sample(rng),
            Self::Normal(d) => d.sample(rng).max(0.0),
            Self::Lognormal(d) => d.sample(rng),
            Self::Weibull(d) => d.sample(rng),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::approx_eq;
    use rand_chacha::{rand_core::SeedableRng, ChaChaRng};
    use std::str::FromStr;

    fn sample_mean(sampler: &Sampler, n: usize) -> f64 {
        let mut rng = ChaChaRng::seed_from_u64(17);
        (0..n).map(|_| sampler.sample(&mut rng)).sum::<f64>() / n as f64
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            DistributionKind::from_str("lognormal").unwrap(),
            DistributionKind::Lognormal
        );
        assert_eq!(DistributionKind::Triangular.to_string(), "triangular");
        assert_eq!(
            serde_json::from_str::<DistributionKind>(r#""deterministic""#).unwrap(),
            DistributionKind::Deterministic
        );
    }

    #[test]
    fn test_wrong_number_of_params() {
        assert!(Sampler::new(DistributionKind::Exponential, &[]).is_err());
        assert!(Sampler::new(DistributionKind::Triangular, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_invalid_params() {
        assert!(Sampler::new(DistributionKind::Exponential, &[0.0]).is_err());
        assert!(Sampler::new(DistributionKind::Uniform, &[2.0, 1.0]).is_err());
        assert!(Sampler::new(DistributionKind::Uniform, &[-1.0, 1.0]).is_err());
        assert!(Sampler::new(DistributionKind::Deterministic, &[-0.5]).is_err());
        assert!(Sampler::new(DistributionKind::Triangular, &[1.0, 0.5, 2.0]).is_err());
        assert!(Sampler::new(DistributionKind::Gamma, &[-1.0, 1.0]).is_err());
        assert!(Sampler::new(DistributionKind::Normal, &[1.0, -1.0]).is_err());
    }

    #[test]
    fn test_sample_means() {
        let n = 100_000;
        let exp = Sampler::new(DistributionKind::Exponential, &[8.0]).unwrap();
        assert!(approx_eq!(f64, sample_mean(&exp, n), 0.125, epsilon = 0.005));
        let uniform = Sampler::new(DistributionKind::Uniform, &[1.0, 3.0]).unwrap();
        assert!(approx_eq!(f64, sample_mean(&uniform, n), 2.0, epsilon = 0.02));
        let triangular = Sampler::new(DistributionKind::Triangular, &[0.0, 1.0, 2.0]).unwrap();
        assert!(approx_eq!(f64, sample_mean(&triangular, n), 1.0, epsilon = 0.02));
        let gamma = Sampler::new(DistributionKind::Gamma, &[2.0, 0.5]).unwrap();
        assert!(approx_eq!(f64, sample_mean(&gamma, n), 1.0, epsilon = 0.02));
        let deterministic = Sampler::new(DistributionKind::Deterministic, &[4.2]).unwrap();
        assert!(approx_eq!(f64, sample_mean(&deterministic, 10), 4.2, epsilon = 1e-12));
    }

    #[test]
    fn test_truncated_normal_is_non_negative() {
        let normal = Sampler::new(DistributionKind::Normal, &[0.0, 1.0]).unwrap();
        let mut rng = ChaChaRng::seed_from_u64(3);
        assert!((0..10_000).all(|_| normal.sample(&mut rng) >= 0.0));
    }
}
