//! Retry wrapper for lock-contended database operations.
//!
//! The store is shared by one writer and many readers. A writer that hits
//! `SQLITE_BUSY`/`SQLITE_LOCKED` backs off exponentially (with a little
//! jitter so competing writers don't re-collide) and retries a bounded
//! number of times. Non-lock errors are never retried.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{Error, Result};

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before the error is surfaced.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the doubled delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubled each time,
    /// capped, plus up to 25% random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = doubled.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        capped + Duration::from_millis(jitter)
    }
}

/// Run a database operation, retrying on lock contention.
///
/// `op` names the operation for logging and the final error. Only errors
/// for which [`Error::is_lock_contention`] holds are retried; anything
/// else is returned on first failure.
///
/// # Errors
///
/// Returns [`Error::Busy`] after exhausting retries, or the operation's
/// own error for non-lock failures.
pub fn with_retry<T, F>(op: &str, policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_lock_contention() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(op, attempt, delay_ms = delay.as_millis() as u64, "Database locked, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if e.is_lock_contention() => {
                return Err(Error::Busy {
                    op: op.to_string(),
                    attempts: attempt,
                });
            }
            Err(e) => return Err(e),
        }
    }
}
