//! # Bounded retry for subscriber deliveries.

use std::time::Duration;

use crate::policies::{BackoffPolicy, JitterPolicy};

/// How often a single subscriber delivery is attempted before it is reported
/// as failed.
///
/// `attempts` counts the first try: `attempts = 1` means no retry, `0` is
/// treated as `1`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts per delivery (min 1).
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Attempts clamped to a minimum of 1.
    #[inline]
    pub fn attempts_clamped(&self) -> u32 {
        self.attempts.max(1)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 50ms doubling up to 1s with equal jitter.
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffPolicy {
                first: Duration::from_millis(50),
                max: Duration::from_secs(1),
                factor: 2.0,
                jitter: JitterPolicy::Equal,
            },
        }
    }
}
