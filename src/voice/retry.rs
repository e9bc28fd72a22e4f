//! Fixed-delay retry for synthesis requests

use std::time::Duration;

/// Retry policy for speech synthesis
///
/// `attempts` counts the first try. Failed attempts are separated by a fixed
/// `delay`; there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between a failed attempt and the next
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy, clamping to at least one attempt
    #[must_use]
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Whether another attempt may follow the given (1-based) attempt
    #[must_use]
    pub const fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }
}
