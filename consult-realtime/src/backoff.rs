//! Reconnect backoff policy.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Exponential backoff with jitter between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 5_000,
            multiplier: 2.0,
            jitter_ms: 500,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the next attempt, given the current base delay.
    pub fn delay(&self, base_ms: u64) -> Duration {
        Duration::from_millis(jittered_backoff(base_ms, self.jitter_ms))
    }

    /// Base delay for the attempt after one that waited `current_ms`.
    pub fn next_backoff(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier) as u64;
        next.min(self.max_ms)
    }
}

/// `base_ms` plus a uniform random offset in `0..jitter_ms`.
fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    base_ms.saturating_add(rand::rng().random_range(0..jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_grows_until_cap() {
        let config = ReconnectConfig {
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 3.0,
            jitter_ms: 0,
        };
        let mut delay = config.initial_ms;
        let mut seen = vec![delay];
        for _ in 0..4 {
            delay = config.next_backoff(delay);
            seen.push(delay);
        }
        assert_eq!(seen, vec![100, 300, 900, 1_000, 1_000]);
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let config = ReconnectConfig {
            jitter_ms: 0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay(250), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_spreads_attempts() {
        let config = ReconnectConfig {
            jitter_ms: 1_000,
            ..ReconnectConfig::default()
        };
        let delays: std::collections::HashSet<_> = (0..64).map(|_| config.delay(100)).collect();
        assert!(delays.len() > 1);
        assert!(delays
            .iter()
            .all(|d| *d >= Duration::from_millis(100) && *d < Duration::from_millis(1_100)));
    }

    proptest! {
        #[test]
        fn jitter_stays_in_bounds(base in 0u64..60_000, jitter in 1u64..5_000) {
            let delay = jittered_backoff(base, jitter);
            prop_assert!(delay >= base);
            prop_assert!(delay < base + jitter);
        }
    }
}
