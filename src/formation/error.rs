//! Error types for cluster formation.

use thiserror::Error;

use crate::control::ControlError;
use crate::sandbox::SandboxError;

/// Errors raised while forming or verifying a cluster.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FormationError {
    /// Raised when a node never starts accepting connections within the
    /// stabilization budget. Connection refusals inside the budget are
    /// absorbed silently; this is the only way they surface.
    #[error("node {node} never accepted connections: {message}")]
    ConnectionTimeout {
        /// Endpoint that was being waited for.
        node: String,
        /// Stabilization failure message with elapsed time and attempts.
        message: String,
    },
    /// Raised when the budget is exhausted before the anchor reports the
    /// expected size with consensus.
    #[error("cloud of size {expected} did not stabilize: {message}")]
    ConsensusTimeout {
        /// Expected member count.
        expected: usize,
        /// Stabilization failure message with elapsed time and attempts.
        message: String,
    },
    /// Raised immediately (never retried) when a node reports more members
    /// than were launched: a stale process with the same cloud name is
    /// likely joining from elsewhere on the network, and waiting only lets
    /// it entrench.
    #[error(
        "observed cloud size {observed} exceeds the expected {expected}; \
         a zombie node with the same cloud name is likely present on the \
         network. Check the member list for addresses you did not launch \
         and kill any stale worker processes before retrying. \
         Members seen: {}",
        members.join(", ")
    )]
    ZombieMembership {
        /// Cloud size reported by the queried node.
        observed: usize,
        /// Member count the harness launched.
        expected: usize,
        /// Member names reported by the queried node.
        members: Vec<String>,
    },
    /// Raised when post-consensus verification finds divergent size, name,
    /// or health across nodes.
    #[error("cluster membership diverged: {message}")]
    MembershipMismatch {
        /// Description of the divergence.
        message: String,
    },
    /// Non-retryable control-plane failure.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// Fatal patterns surfaced by a mid-wait log check.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}
