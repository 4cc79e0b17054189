//! Jitter helpers based on std — avoids pulling in the `rand` crate.
//! Uses a simple xorshift seeded from the current time.

use std::time::Duration;

fn xorshift_seed() -> u64 {
    // Seed from high-resolution clock — good enough for jitter, not crypto.
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x
}

/// Uniform random value in `[0, max_ms)` milliseconds. Zero input yields zero.
pub fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    xorshift_seed() % max_ms
}

/// Uniform random duration in `[min, max)`. Degenerate ranges yield `min`.
pub fn rand_duration_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span_ms = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand_jitter_ms(span_ms))
}
