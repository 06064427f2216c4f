//! Retry backoff for transient fetch failures.

use std::time::Duration;

const BASE_MS: u64 = 500;
const CAP_MS: u64 = 60_000;

/// Exponential backoff with jitter: `base * 2^attempt`, capped at one
/// minute, with up to 25% random spread so parked retries do not stampede.
pub fn backoff_delay(attempt: i64) -> Duration {
    let attempt = attempt.clamp(0, 16) as u32;
    let exp = BASE_MS.saturating_mul(1u64 << attempt).min(CAP_MS);
    // Cheap entropy without a dedicated RNG dependency.
    let jitter_seed = uuid::Uuid::new_v4().as_u128() as u64;
    let spread = exp / 4;
    let jitter = if spread == 0 { 0 } else { jitter_seed % spread };
    Duration::from_millis(exp - spread / 2 + jitter)
}
