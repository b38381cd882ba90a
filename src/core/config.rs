//! # Runtime configuration.
//!
//! - [`PipelineConfig`]: pipeline-wide settings (shutdown grace, event bus, publish retry).
//! - [`DispatcherConfig`]: per-route batching, polling and processing budgets.
//! - [`QueuePolicy`]: visibility timeout and dead-letter threshold of a queue.
//!
//! Sibling queues on one topic may need different budgets (a slow image
//! transform next to a fast copy); that asymmetry lives in each route's
//! [`DispatcherConfig`], never in the topic or queue.
//!
//! ## Sentinel values
//! - `DispatcherConfig::concurrency = 0` → unlimited in-batch concurrency
//! - `DispatcherConfig::processing_timeout = 0s` → no per-batch timeout
//! - `DispatcherConfig::batch_window = 0s` → dispatch whatever the first poll returned
//! - `QueuePolicy::max_receive_count = 0` → never dead-letter

use std::time::Duration;

use crate::error::PipelineError;
use crate::policies::{BackoffPolicy, RetryPolicy};

/// Pipeline-wide configuration.
///
/// ## Field semantics
/// - `grace`: maximum wait for dispatchers to drain after shutdown (`0s` = abandon immediately)
/// - `bus_capacity`: runtime event bus ring buffer size (min 1)
/// - `publish_retry`: per-subscriber enqueue retry during fan-out
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Maximum time to wait for in-flight batches after a shutdown request.
    ///
    /// Dispatchers still running afterwards are aborted; their messages were
    /// never acknowledged and will be redelivered by their queues.
    pub grace: Duration,

    /// Capacity of the runtime event bus.
    pub bus_capacity: usize,

    /// Retry applied independently to each subscriber delivery.
    pub publish_retry: RetryPolicy,
}

impl PipelineConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for PipelineConfig {
    /// `grace = 60s`, `bus_capacity = 1024`, `publish_retry = RetryPolicy::default()`.
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            publish_retry: RetryPolicy::default(),
        }
    }
}

/// Per-dispatcher configuration.
///
/// A batch is dispatched when it holds `batch_size` messages or when
/// `batch_window` has elapsed since its first message arrived, whichever comes
/// first. Each empty long-poll waits at most `wait_time`.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Maximum messages per batch (min 1).
    pub batch_size: usize,
    /// Accumulation window measured from the first message of a batch.
    pub batch_window: Duration,
    /// Long-poll wait of an empty receive.
    pub wait_time: Duration,
    /// In-batch concurrency limit (`0` = unlimited).
    pub concurrency: usize,
    /// Deadline for handling one batch (`0s` = none).
    pub processing_timeout: Duration,
    /// Delay schedule after consecutive failed polls.
    pub poll_backoff: BackoffPolicy,
}

impl DispatcherConfig {
    /// Returns the in-batch concurrency limit as an `Option`.
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.concurrency {
            0 => None,
            n => Some(n),
        }
    }

    /// Returns the per-batch timeout as an `Option`.
    #[inline]
    pub fn batch_timeout(&self) -> Option<Duration> {
        if self.processing_timeout == Duration::ZERO {
            None
        } else {
            Some(self.processing_timeout)
        }
    }

    /// Rejects configurations the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "batch_size must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Checks that messages stay hidden long enough to be batched and handled.
    ///
    /// Returns `false` if `visibility_timeout` is shorter than the window plus
    /// the batch timeout: such messages may be redelivered while still in work.
    pub fn fits_visibility(&self, policy: &QueuePolicy) -> bool {
        match self.batch_timeout() {
            Some(t) => policy.visibility_timeout >= self.batch_window + t,
            None => true,
        }
    }
}

impl Default for DispatcherConfig {
    /// `batch_size = 5`, `batch_window = 5s`, `wait_time = 10s`,
    /// `concurrency = 5`, `processing_timeout = 15s`, `poll_backoff = BackoffPolicy::default()`.
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_window: Duration::from_secs(5),
            wait_time: Duration::from_secs(10),
            concurrency: 5,
            processing_timeout: Duration::from_secs(15),
            poll_backoff: BackoffPolicy::default(),
        }
    }
}

/// Redelivery policy of a queue.
#[derive(Clone, Copy, Debug)]
pub struct QueuePolicy {
    /// How long a received message stays hidden from other receivers.
    pub visibility_timeout: Duration,
    /// Receives after which an unacknowledged message is dead-lettered (`0` = never).
    pub max_receive_count: u32,
}

impl QueuePolicy {
    /// Returns the dead-letter threshold as an `Option`.
    #[inline]
    pub fn receive_limit(&self) -> Option<u32> {
        match self.max_receive_count {
            0 => None,
            n => Some(n),
        }
    }
}

impl Default for QueuePolicy {
    /// `visibility_timeout = 30s`, `max_receive_count = 3`.
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dispatcher_fits_default_queue() {
        let cfg = DispatcherConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.fits_visibility(&QueuePolicy::default()));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let cfg = DispatcherConfig {
            batch_size: 0,
            ..DispatcherConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.as_label(), "invalid_config");
    }

    #[test]
    fn sentinels_map_to_none() {
        let cfg = DispatcherConfig {
            concurrency: 0,
            processing_timeout: Duration::ZERO,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.batch_timeout(), None);
        let unbounded = QueuePolicy {
            max_receive_count: 0,
            ..QueuePolicy::default()
        };
        assert_eq!(unbounded.receive_limit(), None);
    }

    #[test]
    fn short_visibility_does_not_fit() {
        let cfg = DispatcherConfig::default();
        let policy = QueuePolicy {
            visibility_timeout: Duration::from_secs(10),
            ..QueuePolicy::default()
        };
        assert!(!cfg.fits_visibility(&policy));
    }
}
