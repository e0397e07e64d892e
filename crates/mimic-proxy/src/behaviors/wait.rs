//! Wait behavior - simulated upstream latency.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Distribution a replayed response's delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DelayStrategy {
    /// No delay
    #[default]
    None,
    /// Always `mean`
    Fixed,
    /// Uniform integer in `[min, max]`
    Random,
    /// Gaussian around the middle of `[min, max]`, resampled until inside it
    Normal,
    /// `min - mean * ln(1 - U)`, capped at `max`
    Exponential,
}

/// Parameters that make a strategy impossible to sample.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelayConfigError {
    #[error("{strategy} delay requires min <= max (min={min}, max={max})")]
    MinAboveMax {
        strategy: DelayStrategy,
        min: u64,
        max: u64,
    },
    #[error("{strategy} delay requires min <= mean <= max (min={min}, mean={mean}, max={max})")]
    MeanOutOfRange {
        strategy: DelayStrategy,
        min: u64,
        mean: u64,
        max: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown delay strategy: {0}")]
pub struct UnknownDelayStrategy(pub String);

impl DelayStrategy {
    pub const ALL: [DelayStrategy; 5] = [
        DelayStrategy::None,
        DelayStrategy::Fixed,
        DelayStrategy::Random,
        DelayStrategy::Normal,
        DelayStrategy::Exponential,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayStrategy::None => "NONE",
            DelayStrategy::Fixed => "FIXED",
            DelayStrategy::Random => "RANDOM",
            DelayStrategy::Normal => "NORMAL",
            DelayStrategy::Exponential => "EXPONENTIAL",
        }
    }

    /// Check that the parameters can be sampled with this strategy.
    pub fn check(&self, min: u64, mean: u64, max: u64) -> Result<(), DelayConfigError> {
        match self {
            DelayStrategy::None | DelayStrategy::Fixed => Ok(()),
            DelayStrategy::Random | DelayStrategy::Normal if min > max => {
                Err(DelayConfigError::MinAboveMax {
                    strategy: *self,
                    min,
                    max,
                })
            }
            DelayStrategy::Random | DelayStrategy::Normal => Ok(()),
            DelayStrategy::Exponential if min > mean || mean > max => {
                Err(DelayConfigError::MeanOutOfRange {
                    strategy: *self,
                    min,
                    mean,
                    max,
                })
            }
            DelayStrategy::Exponential => Ok(()),
        }
    }

    /// Sample a delay in milliseconds.
    ///
    /// Misconfigured parameters are logged and yield 0; a bad delay never
    /// holds back a response.
    pub fn sample<R: Rng + ?Sized>(&self, min: u64, mean: u64, max: u64, rng: &mut R) -> u64 {
        if let Err(e) = self.check(min, mean, max) {
            warn!("Ignoring delay: {}", e);
            return 0;
        }
        match self {
            DelayStrategy::None => 0,
            DelayStrategy::Fixed => mean,
            DelayStrategy::Random => rng.gen_range(min..=max),
            DelayStrategy::Normal => sample_normal(min, max, rng),
            DelayStrategy::Exponential => {
                let u: f64 = rng.gen();
                let sample = min as f64 - mean as f64 * (1.0 - u).ln();
                (sample as u64).min(max)
            }
        }
    }

    /// Sample with the thread-local generator.
    pub fn get_duration_ms(&self, min: u64, mean: u64, max: u64) -> u64 {
        self.sample(min, mean, max, &mut rand::thread_rng())
    }
}

/// Resample rather than clamp so the bounds don't collect the tails.
fn sample_normal<R: Rng + ?Sized>(min: u64, max: u64, rng: &mut R) -> u64 {
    let span = (max - min) as f64;
    let range = span / 2.0;
    loop {
        let offset = standard_normal(rng) * range + range;
        if (0.0..=span).contains(&offset) {
            return min.saturating_add(offset as u64).clamp(min, max);
        }
    }
}

/// Box-Muller transform.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl fmt::Display for DelayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DelayStrategy {
    type Err = UnknownDelayStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DelayStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownDelayStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_delay_none_and_fixed() {
        assert_eq!(DelayStrategy::None.get_duration_ms(10, 20, 30), 0);
        assert_eq!(DelayStrategy::Fixed.get_duration_ms(10, 20, 30), 20);
    }

    #[test]
    fn test_delay_random_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let delay = DelayStrategy::Random.sample(100, 0, 200, &mut rng);
            assert!((100..=200).contains(&delay), "Delay {delay} not in range 100-200");
        }
    }

    #[test]
    fn test_delay_normal_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            let delay = DelayStrategy::Normal.sample(100, 0, 200, &mut rng);
            assert!((100..=200).contains(&delay), "Delay {delay} not in range 100-200");
        }
    }

    #[test]
    fn test_delay_normal_centered() {
        let mut rng = StdRng::seed_from_u64(3);
        let total: u64 = (0..10_000)
            .map(|_| DelayStrategy::Normal.sample(100, 0, 200, &mut rng))
            .sum();
        let average = total as f64 / 10_000.0;
        assert!((140.0..160.0).contains(&average), "Average {average} not near 150");
    }

    #[test]
    fn test_delay_normal_near_u64_max() {
        let mut rng = StdRng::seed_from_u64(21);
        let (min, max) = (u64::MAX - 1_000, u64::MAX);
        for _ in 0..1_000 {
            let delay = DelayStrategy::Normal.sample(min, 0, max, &mut rng);
            assert!((min..=max).contains(&delay));
        }
        // Full range returns instead of resampling forever.
        let _ = DelayStrategy::Normal.sample(0, 0, u64::MAX, &mut rng);
    }

    #[test]
    fn test_delay_normal_degenerate_range() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(DelayStrategy::Normal.sample(50, 0, 50, &mut rng), 50);
    }

    #[test]
    fn test_delay_exponential_bounds() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..10_000 {
            let delay = DelayStrategy::Exponential.sample(100, 150, 400, &mut rng);
            assert!((100..=400).contains(&delay), "Delay {delay} not in range 100-400");
        }
    }

    #[test]
    fn test_delay_misconfiguration_yields_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(DelayStrategy::Random.sample(200, 0, 100, &mut rng), 0);
        assert_eq!(DelayStrategy::Normal.sample(200, 0, 100, &mut rng), 0);
        assert_eq!(DelayStrategy::Exponential.sample(100, 50, 200, &mut rng), 0);
        assert_eq!(DelayStrategy::Exponential.sample(100, 300, 200, &mut rng), 0);
    }

    #[test]
    fn test_delay_check() {
        assert!(DelayStrategy::Fixed.check(5, 0, 1).is_ok());
        assert!(matches!(
            DelayStrategy::Random.check(5, 0, 1),
            Err(DelayConfigError::MinAboveMax { .. })
        ));
        assert!(matches!(
            DelayStrategy::Exponential.check(1, 9, 5),
            Err(DelayConfigError::MeanOutOfRange { .. })
        ));
    }

    #[test]
    fn test_delay_strategy_parse() {
        assert_eq!("normal".parse::<DelayStrategy>().unwrap(), DelayStrategy::Normal);
        assert_eq!("FIXED".parse::<DelayStrategy>().unwrap(), DelayStrategy::Fixed);
        assert!("gamma".parse::<DelayStrategy>().is_err());
        assert_eq!(DelayStrategy::Exponential.to_string(), "EXPONENTIAL");
    }

    #[test]
    fn test_delay_strategy_serde() {
        let strategy: DelayStrategy = serde_yaml::from_str("RANDOM").unwrap();
        assert_eq!(strategy, DelayStrategy::Random);
    }
}
