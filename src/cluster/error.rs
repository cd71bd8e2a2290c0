//! Umbrella error for cluster lifecycle operations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::control::ControlError;
use crate::formation::FormationError;
use crate::node::NodeError;
use crate::peers::PeersError;
use crate::sandbox::SandboxError;

use super::descriptor::DescriptorError;

/// Errors raised by the cluster lifecycle manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClusterError {
    /// Configuration resolution failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Cluster formation or verification failed.
    #[error(transparent)]
    Formation(#[from] FormationError),
    /// Descriptor loading, validation, or writing failed.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// A node could not be launched or controlled.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// Peer-discovery preparation failed.
    #[error(transparent)]
    Peers(#[from] PeersError),
    /// A control-plane request failed outside formation.
    #[error(transparent)]
    Control(#[from] ControlError),
    /// The sandbox log check surfaced fatal patterns.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// The sandbox directory could not be prepared.
    #[error("failed to prepare {path}: {message}")]
    Io {
        /// Path that could not be prepared.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
}
