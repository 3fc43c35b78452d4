//! Exponential backoff with jitter

use rand::Rng;
use std::time::Duration;

/// Default delay before the first retry
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on the exponential part
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter is drawn from `[0, capped * DEFAULT_JITTER_FACTOR]`
const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Stateless retry delay policy.
///
/// `delay(n) = min(max_delay, base_delay * 2^n) + jitter`, with `n` zero-based
/// (the first retry uses `n = 0`).
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay for the given zero-based retry attempt, jitter included
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.delay_without_jitter(attempt);
        let factor = self.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 || capped.is_zero() {
            return capped;
        }

        let jitter = capped.as_secs_f64() * factor * rand::thread_rng().gen::<f64>();
        capped + Duration::from_secs_f64(jitter)
    }

    /// The capped exponential part of [`Self::delay`]
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Largest value [`Self::delay`] can return for this attempt
    pub fn max_delay_for(&self, attempt: u32) -> Duration {
        let capped = self.delay_without_jitter(attempt);
        capped + capped.mul_f64(self.jitter_factor.clamp(0.0, 1.0))
    }
}
