//! Error types for the job poller.

use std::time::Duration;

use thiserror::Error;

use crate::control::ControlError;
use crate::sandbox::SandboxError;

/// Errors raised while driving an asynchronous job to completion.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    /// Raised when the overall polling budget is exhausted. Carries the last
    /// observed state for diagnosability.
    #[error(
        "exceeded {timeout:?} while polling; last status '{status}', url {url}{params}"
    )]
    PollTimeout {
        /// Overall budget that was exceeded.
        timeout: Duration,
        /// Last status observed before the deadline.
        status: String,
        /// Last URL that was being polled.
        url: String,
        /// Rendered query parameters of that URL, `?`-prefixed when present.
        params: String,
    },
    /// Raised when a response does not match either job-status shape.
    #[error("job response invalid: {message}")]
    Protocol {
        /// Description of what was missing or malformed.
        message: String,
    },
    /// Transport or remote-error failure from the control plane.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// Fatal patterns surfaced by a mid-poll log check.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}
