//! Retry backoff policy for failed application attempts.
//!
//! Pure function of (attempt number, rate-limited?) → delay. Rate-limit
//! failures back off three times harder than ordinary errors, and jitter
//! spreads retries out so a burst of failures does not come back as a
//! synchronized retry storm.

use std::time::Duration;

use crate::util::rand_jitter_ms;

/// Backoff parameters. Defaults: 20 s base (60 s when rate-limited),
/// doubling per attempt, capped at 30 minutes, up to 15 % jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub rate_limit_multiplier: u32,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as uniform jitter.
    pub jitter_factor: f64,
    /// Absolute ceiling on the jitter itself.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(20),
            rate_limit_multiplier: 3,
            max_delay: Duration::from_secs(1800),
            jitter_factor: 0.15,
            max_jitter: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay without jitter: `base × 2^(attempt-1)`, capped.
    ///
    /// Monotone non-decreasing in `attempt_number`; the rate-limited
    /// delay dominates the ordinary delay at every attempt.
    pub fn raw_delay(&self, attempt_number: u32, rate_limited: bool) -> Duration {
        let base = if rate_limited {
            self.base_delay * self.rate_limit_multiplier
        } else {
            self.base_delay
        };
        let exponent = attempt_number.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }

    /// Delay with jitter applied, never exceeding `max_delay`.
    pub fn next_delay(&self, attempt_number: u32, rate_limited: bool) -> Duration {
        let raw = self.raw_delay(attempt_number, rate_limited);
        let jitter_cap = std::cmp::min(
            Duration::from_secs_f64(raw.as_secs_f64() * self.jitter_factor),
            self.max_jitter,
        );
        let jitter = Duration::from_millis(rand_jitter_ms(jitter_cap.as_millis() as u64));
        std::cmp::min(raw + jitter, self.max_delay)
    }
}
