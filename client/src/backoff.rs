//! Reconnection backoff policy.

use std::time::Duration;

/// Give up after this many consecutive failed reconnection attempts.
/// Recovery after exhaustion requires an identity transition (re-login).
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 10_000;

/// Delay before reconnect attempt number `attempt` (0-based, counted since
/// the last successful open): 1s, 2s, 4s, 8s, then capped at 10s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(31));
    Duration::from_millis(exp.min(MAX_DELAY_MS))
}
