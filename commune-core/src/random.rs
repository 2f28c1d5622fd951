//! Random number generation provider abstraction.
//!
//! Reconnect jitter is the only consumer in this workspace, but the trait
//! mirrors the other providers so tests can pin the sampled delays.

use rand::distr::uniform::SampleUniform;
use rand::prelude::*;
use std::cell::RefCell;
use std::ops::Range;

/// Provider trait for random number generation.
pub trait RandomProvider: Clone {
    /// Generate a random value within a range (exclusive upper bound).
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;

    /// Generate a random f64 in `[0.0, 1.0)`.
    fn random_ratio(&self) -> f64;
}

/// Production random provider using the thread-local RNG.
#[derive(Clone, Debug, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::rng());
}

impl RandomProvider for TokioRandomProvider {
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        RNG.with(|rng| rng.borrow_mut().random_range(range))
    }

    fn random_ratio(&self) -> f64 {
        RNG.with(|rng| rng.borrow_mut().random())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_bounds_respected() {
        let random = TokioRandomProvider::new();
        for _ in 0..1000 {
            let v: u64 = random.random_range(30..131);
            assert!((30..131).contains(&v));
        }
    }

    #[test]
    fn ratio_in_unit_interval() {
        let random = TokioRandomProvider::new();
        for _ in 0..100 {
            let r = random.random_ratio();
            assert!((0.0..1.0).contains(&r));
        }
    }
}
