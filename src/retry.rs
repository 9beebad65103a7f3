//! Retry Logic with Capped Exponential Backoff
//!
//! Storage calls on the read path go through [`retry_with_backoff`]. Each
//! failure is classified before deciding to retry:
//!
//! **Transient** (retried):
//! - `TimedOut`, `Interrupted`, `WouldBlock`
//! - `ConnectionReset`, `ConnectionAborted`
//!
//! **Permanent** (returned immediately):
//! - `NotFound`, left to the caller to treat as absence or failure
//! - everything else
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: wait initial_backoff
//! Attempt 3: wait initial_backoff * 2
//! ...        capped at max_backoff
//! ```

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, ShuffleError};

/// Retry policy for transient storage errors
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = try once)
    pub max_retries: usize,

    /// Backoff before the first retry
    pub initial_backoff: Duration,

    /// Upper bound for any single backoff
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    /// Fixed-interval policy
    pub fn fixed(max_retries: usize, interval: Duration) -> Self {
        Self::new(max_retries, interval, interval, 1.0)
    }

    /// Backoff before retry number `attempt` (0-indexed):
    /// min(initial_backoff * multiplier^attempt, max_backoff)
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }

    /// Whether an I/O error is worth retrying
    pub fn is_retryable(&self, error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
        )
    }
}

/// Outcome of a retried storage call that did not succeed
#[derive(Debug)]
pub enum RetryError {
    /// A permanent error, returned on first sight
    Permanent(io::Error),

    /// A transient error that outlived every retry
    Exhausted { attempts: usize, source: io::Error },
}

impl RetryError {
    /// Whether the underlying failure says the target does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RetryError::Permanent(e) if e.kind() == io::ErrorKind::NotFound)
    }

    /// Whether a read ran past the end of its target
    pub fn is_unexpected_eof(&self) -> bool {
        matches!(self, RetryError::Permanent(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// Convert into the crate error, naming the operation that failed
    pub fn into_shuffle_error(self, operation: impl Into<String>) -> ShuffleError {
        match self {
            RetryError::Permanent(e) => ShuffleError::Io(e),
            RetryError::Exhausted { attempts, source } => ShuffleError::RetriesExhausted {
                operation: operation.into(),
                attempts,
                source,
            },
        }
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
pub fn retry_with_backoff<T, F>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> io::Result<T>,
{
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt = attempt + 1, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !policy.is_retryable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Max retries exhausted, giving up"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        source: e,
                    });
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient storage error, backing off"
                );
                thread::sleep(backoff);
                attempt += 1;
            }
        }
    }
}

/// Like [`retry_with_backoff`], mapping failures straight into `ShuffleError`
pub fn retry_io<T, F>(policy: &RetryPolicy, operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    retry_with_backoff(policy, operation_name, operation)
        .map_err(|e| e.into_shuffle_error(operation_name))
}
