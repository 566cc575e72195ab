use derive_more::Constructor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection backoff policy for a flaky upstream transport.
///
/// The delay before attempt `k` (0-indexed) is drawn uniformly from
/// `[0, min(base_ms * 2^k, max_ms))` - full jitter over a capped exponential ceiling.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, Constructor,
)]
pub struct BackoffPolicy {
    /// Backoff ceiling millisecond duration for the first reconnection attempt.
    ///
    /// This value doubles on every further failed attempt until `max_ms` caps it.
    pub base_ms: u64,

    /// Maximum possible backoff ceiling between reconnection attempts.
    pub max_ms: u64,

    /// Number of attempts before the transport is considered unreachable.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 5_000,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// The exponential ceiling for the provided attempt, in milliseconds.
    pub fn ceiling_ms(&self, attempt: u32) -> u64 {
        let scaled = self.base_ms.saturating_mul(2u64.saturating_pow(attempt));
        std::cmp::min(scaled, self.max_ms)
    }

    /// Generate the jittered sleep [`Duration`] for the provided attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_ms(attempt);
        let jitter_ms = if ceiling > 0 {
            rand::rng().random_range(0..ceiling)
        } else {
            0
        };

        Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_until_capped() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.ceiling_ms(0), 100);
        assert_eq!(policy.ceiling_ms(1), 200);
        assert_eq!(policy.ceiling_ms(4), 1_600);
        assert_eq!(policy.ceiling_ms(5), 3_200);
        assert_eq!(policy.ceiling_ms(6), 5_000);
        assert_eq!(policy.ceiling_ms(60), 5_000);
    }

    #[test]
    fn test_delay_within_jitter_bounds() {
        let policy = BackoffPolicy::default();

        for attempt in 0..policy.max_attempts {
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay < Duration::from_millis(policy.ceiling_ms(attempt)));
            }
        }
    }
}
