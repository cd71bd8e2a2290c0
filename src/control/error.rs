//! Error types for the control-plane client.

use thiserror::Error;

/// Errors raised by control-plane requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlError {
    /// Raised when the node is not accepting connections. This is the only
    /// retryable kind; stabilization loops absorb it until their budget is
    /// exhausted.
    #[error("connection to {url} failed: {message}")]
    Connection {
        /// URL that could not be reached.
        url: String,
        /// Transport-level error message.
        message: String,
    },
    /// Raised when a single request exceeds its socket-level timeout.
    #[error("request to {url} timed out after {timeout_ms} ms")]
    RequestTimeout {
        /// URL of the request.
        url: String,
        /// Per-request timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },
    /// Raised for any other HTTP-level failure, including non-success status
    /// codes.
    #[error("http error from {url}: {message}")]
    Http {
        /// URL of the request.
        url: String,
        /// Error message from the HTTP layer.
        message: String,
    },
    /// Raised when a response body is not valid JSON.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// URL of the request.
        url: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the response itself carries a truthy error field.
    #[error("remote error from {url} under '{key}': {detail}")]
    Remote {
        /// URL of the request.
        url: String,
        /// Response key the error was found under.
        key: String,
        /// Rendered error payload.
        detail: String,
    },
}

impl ControlError {
    /// Returns `true` for errors that mean "the node is not up yet".
    ///
    /// Only these are treated as retryable during connection stabilization;
    /// everything else propagates immediately.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns `true` for transport-level failures (connection or
    /// per-request timeout) as opposed to protocol-level ones.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RequestTimeout { .. })
    }
}
