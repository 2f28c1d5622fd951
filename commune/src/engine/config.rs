//! Election policy: the retry constants as configurable data.

use std::time::Duration;

use commune_core::RandomProvider;

/// Tunable policy for election retries and recovery.
///
/// The defaults are the compatibility values: ten consecutive bind attempts
/// before giving up, and reconnect delays drawn uniformly from 30–130 ms so
/// a herd of followers does not stampede a freshly elected leader.
#[derive(Clone, Debug)]
pub struct ElectionPolicy {
    /// Consecutive bind failures tolerated before a fatal error.
    pub bind_attempts: u32,

    /// Lower bound (inclusive) of the jittered retry delay.
    pub retry_delay_min: Duration,

    /// Upper bound (inclusive) of the jittered retry delay.
    pub retry_delay_max: Duration,

    /// Timeout for one dial attempt at the leader's socket.
    pub connect_timeout: Duration,

    /// How often a held lock is re-checked for compromise.
    pub lock_poll_interval: Duration,
}

impl Default for ElectionPolicy {
    fn default() -> Self {
        Self {
            bind_attempts: 10,
            retry_delay_min: Duration::from_millis(30),
            retry_delay_max: Duration::from_millis(130),
            connect_timeout: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(500),
        }
    }
}

impl ElectionPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the number of consecutive bind attempts.
    pub fn with_bind_attempts(mut self, attempts: u32) -> Self {
        self.bind_attempts = attempts;
        self
    }

    /// Override the jittered retry window (inclusive on both ends).
    pub fn with_retry_window(mut self, min: Duration, max: Duration) -> Self {
        self.retry_delay_min = min;
        self.retry_delay_max = max;
        self
    }

    /// Override the dial timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the lock compromise poll interval.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Draw one retry delay, uniform over the inclusive window.
    pub fn sample_retry_delay<R: RandomProvider>(&self, random: &R) -> Duration {
        let min = self.retry_delay_min.as_millis() as u64;
        let max = self.retry_delay_max.as_millis() as u64;
        if min >= max {
            return self.retry_delay_min;
        }
        Duration::from_millis(random.random_range(min..max + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commune_core::TokioRandomProvider;

    #[test]
    fn defaults_match_compatibility_values() {
        let policy = ElectionPolicy::default();
        assert_eq!(policy.bind_attempts, 10);
        assert_eq!(policy.retry_delay_min, Duration::from_millis(30));
        assert_eq!(policy.retry_delay_max, Duration::from_millis(130));
    }

    #[test]
    fn sampled_delays_stay_in_window() {
        let policy = ElectionPolicy::default();
        let random = TokioRandomProvider::new();
        for _ in 0..1000 {
            let delay = policy.sample_retry_delay(&random);
            assert!(delay >= policy.retry_delay_min, "below window: {delay:?}");
            assert!(delay <= policy.retry_delay_max, "above window: {delay:?}");
            assert!(delay > Duration::ZERO, "busy-retry delay");
        }
    }

    #[test]
    fn degenerate_window_is_constant() {
        let policy = ElectionPolicy::default()
            .with_retry_window(Duration::from_millis(50), Duration::from_millis(50));
        let random = TokioRandomProvider::new();
        for _ in 0..10 {
            assert_eq!(
                policy.sample_retry_delay(&random),
                Duration::from_millis(50)
            );
        }
    }
}
