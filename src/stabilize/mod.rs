//! Generic bounded-retry poller.
//!
//! `stabilize` repeatedly invokes a predicate until it reports success or a
//! timeout budget is exhausted, sleeping between attempts. Retries for one
//! call never overlap; the loop blocks the calling task. Timing runs on
//! `tokio::time` so timeout properties can be tested under a paused clock.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::sandbox::{SandboxError, SandboxMonitor};

/// How often (in attempts) a long stall triggers an out-of-band log check,
/// so the root cause surfaces early rather than only at final timeout.
pub const SANDBOX_CHECK_CADENCE: u32 = 50;

/// Retry budget scoped to one stabilization call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryBudget {
    /// Wall-clock budget for the whole call.
    pub timeout: Duration,
    /// Sleep between attempts.
    pub retry_delay: Duration,
}

impl RetryBudget {
    /// Creates a budget from a timeout and a retry delay.
    #[must_use]
    pub const fn new(timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            timeout,
            retry_delay,
        }
    }
}

/// Errors raised by [`stabilize`].
#[derive(Debug, Error)]
pub enum StabilizeError<E> {
    /// Raised when the budget is exhausted before the predicate succeeds.
    #[error("{message} failed after {elapsed:.2?} having retried {attempts} times")]
    Timeout {
        /// Caller-supplied description of what was being waited for.
        message: String,
        /// Wall-clock time spent in the call.
        elapsed: Duration,
        /// Number of completed attempts.
        attempts: u32,
    },
    /// Raised when the predicate itself fails; never retried.
    #[error(transparent)]
    Predicate(E),
    /// Raised when the mid-wait log check finds fatal patterns.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Repeatedly invokes `test` until it returns `Ok(true)` or the budget is
/// exhausted.
///
/// `test` receives the zero-based attempt number. `Ok(false)` retries after
/// the budget's delay; `Err` propagates immediately. Every
/// [`SANDBOX_CHECK_CADENCE`]th attempt triggers a log check through the
/// monitor when one is supplied. `describe` produces the failure message and
/// is called with the elapsed time and attempt count only on timeout.
///
/// A predicate that never succeeds fails within
/// `[timeout, timeout + retry_delay]` wall-clock time.
///
/// # Errors
///
/// Returns [`StabilizeError::Timeout`] on budget exhaustion,
/// [`StabilizeError::Predicate`] on predicate failure, and
/// [`StabilizeError::Sandbox`] when the mid-wait check finds fatal patterns.
pub async fn stabilize<F, Fut, E, D>(
    mut test: F,
    describe: D,
    budget: RetryBudget,
    monitor: Option<&SandboxMonitor>,
) -> Result<(), StabilizeError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    D: FnOnce(Duration, u32) -> String,
{
    let start = Instant::now();
    let deadline = start + budget.timeout;
    let mut attempts: u32 = 0;

    loop {
        if test(attempts).await.map_err(StabilizeError::Predicate)? {
            return Ok(());
        }
        attempts = attempts.saturating_add(1);
        if attempts % SANDBOX_CHECK_CADENCE == 0 {
            if let Some(monitor) = monitor {
                monitor.assert_clean(false)?;
            }
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(budget.retry_delay).await;
    }

    let elapsed = start.elapsed();
    Err(StabilizeError::Timeout {
        message: describe(elapsed, attempts),
        elapsed,
        attempts,
    })
}
