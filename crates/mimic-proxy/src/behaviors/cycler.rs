//! Response cycling state management.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// How the next response of a recording is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStrategy {
    /// Walk the responses in order, each repeated `weight` times
    #[default]
    Sequential,
    /// Pick at random, proportional to weight
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown response strategy: {0}")]
pub struct UnknownResponseStrategy(pub String);

impl ResponseStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStrategy::Sequential => "SEQUENTIAL",
            ResponseStrategy::Random => "RANDOM",
        }
    }

    /// Index of the response to use, or `None` when the weights sum to zero.
    ///
    /// `counter` is the number of responses already served; only the
    /// sequential strategy looks at it.
    pub fn pick<R: Rng + ?Sized>(&self, weights: &[u64], counter: u64, rng: &mut R) -> Option<usize> {
        let total = weights.iter().fold(0u64, |sum, weight| sum.saturating_add(*weight));
        if total == 0 {
            return None;
        }
        let target = match self {
            ResponseStrategy::Sequential => counter % total,
            ResponseStrategy::Random => rng.gen_range(0..total),
        };
        let mut running = 0u64;
        weights.iter().position(|weight| {
            running = running.saturating_add(*weight);
            running > target
        })
    }
}

impl fmt::Display for ResponseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseStrategy {
    type Err = UnknownResponseStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEQUENTIAL" => Ok(ResponseStrategy::Sequential),
            "RANDOM" => Ok(ResponseStrategy::Random),
            _ => Err(UnknownResponseStrategy(s.to_string())),
        }
    }
}

/// Lock-free replay counters of one recording.
///
/// `total` counts every response served since load and drives sequential
/// selection. `current` counts responses since the last statistics
/// collection.
#[derive(Default)]
pub struct ResponseCounters {
    total: AtomicU64,
    current: AtomicU64,
}

impl ResponseCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            current: AtomicU64::new(0),
        }
    }

    /// Count one served response, returning the total before it.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Read and zero the since-last-collection counter.
    pub fn take_current(&self) -> u64 {
        self.current.swap(0, Ordering::Relaxed)
    }

    /// Forget the lifetime count. Used when the cache is reset.
    pub fn reset_total(&self) {
        self.total.store(0, Ordering::Relaxed);
    }
}

impl fmt::Debug for ResponseCounters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResponseCounters")
            .field("total", &self.total())
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    #[test]
    fn test_sequential_weighted_sequence() {
        let mut rng = StdRng::seed_from_u64(0);
        let picks: Vec<usize> = (0..6)
            .map(|counter| {
                ResponseStrategy::Sequential
                    .pick(&[2, 1], counter, &mut rng)
                    .unwrap()
            })
            .collect();
        assert_eq!(picks, vec![0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let mut rng = StdRng::seed_from_u64(0);
        for counter in 0..20 {
            let pick = ResponseStrategy::Sequential.pick(&[0, 3, 0, 1], counter, &mut rng);
            assert!(matches!(pick, Some(1) | Some(3)));
            let pick = ResponseStrategy::Random.pick(&[0, 3, 0, 1], counter, &mut rng);
            assert!(matches!(pick, Some(1) | Some(3)));
        }
    }

    #[test]
    fn test_huge_weights_saturate() {
        let mut rng = StdRng::seed_from_u64(4);
        let weights = [u64::MAX, u64::MAX, 1];
        assert_eq!(
            ResponseStrategy::Sequential.pick(&weights, u64::MAX - 1, &mut rng),
            Some(0)
        );
        for _ in 0..100 {
            let pick = ResponseStrategy::Random.pick(&weights, 0, &mut rng).unwrap();
            assert!(pick < weights.len());
        }
    }

    #[test]
    fn test_all_zero_weights_yield_none() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(ResponseStrategy::Sequential.pick(&[0, 0], 0, &mut rng), None);
        assert_eq!(ResponseStrategy::Random.pick(&[], 0, &mut rng), None);
    }

    #[test]
    fn test_random_follows_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut hits = [0u32; 2];
        for _ in 0..10_000 {
            let pick = ResponseStrategy::Random.pick(&[3, 1], 0, &mut rng).unwrap();
            hits[pick] += 1;
        }
        assert!(hits[0] > hits[1] * 2, "Hits {hits:?} do not follow 3:1 weights");
    }

    #[test]
    fn test_response_strategy_parse() {
        assert_eq!(
            "random".parse::<ResponseStrategy>().unwrap(),
            ResponseStrategy::Random
        );
        assert!("round_robin".parse::<ResponseStrategy>().is_err());
    }

    #[test]
    fn test_counters_advance_and_take() {
        let counters = ResponseCounters::new();
        assert_eq!(counters.advance(), 0);
        assert_eq!(counters.advance(), 1);
        assert_eq!(counters.total(), 2);
        assert_eq!(counters.take_current(), 2);
        assert_eq!(counters.current(), 0);
        assert_eq!(counters.total(), 2);
        counters.reset_total();
        assert_eq!(counters.total(), 0);
    }

    #[test]
    fn test_counters_concurrent_advance() {
        let counters = Arc::new(ResponseCounters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.advance();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.total(), 8000);
        assert_eq!(counters.current(), 8000);
    }
}
