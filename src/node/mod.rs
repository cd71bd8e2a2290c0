//! Node handles: one trait, three launch flavours.
//!
//! A node is one member of the compute cloud. The harness only needs a small
//! capability set from it: identity, endpoint, liveness, forced termination,
//! and a serializable state snapshot. [`LocalProcessNode`] wraps a process
//! spawned on this host, [`RemoteSshNode`] a process launched through the
//! system `ssh` client, and [`ClonedNode`] a member reconstructed from a
//! descriptor with no process handle at all. The flavour is chosen by the
//! launcher/factory, never by downcasting.

use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::Endpoint;

mod cloned;
mod local;
mod remote;

pub use cloned::ClonedNode;
pub use local::{LocalNodeLauncher, LocalProcessNode};
pub use remote::{RemoteHost, RemoteSshNode, SshNodeLauncher};

/// Future returned by node operations.
pub type NodeFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, NodeError>> + Send + 'a>>;

/// Errors raised by node handles and launchers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NodeError {
    /// Raised when the worker process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when a log file or directory cannot be prepared.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when a process handle cannot be terminated.
    #[error("failed to terminate node {node}: {message}")]
    Terminate {
        /// Endpoint of the node.
        node: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when a launch plan is missing what the launcher needs.
    #[error("invalid launch plan for node {node_id}: {message}")]
    InvalidPlan {
        /// Ordinal of the node in the plan.
        node_id: usize,
        /// Description of the missing piece.
        message: String,
    },
}

/// Serializable snapshot of a node, sufficient to reconstruct a
/// [`ClonedNode`] without relaunching a process.
///
/// Unknown fields are rejected so a descriptor from a different harness
/// version fails loudly instead of silently dropping state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeState {
    /// Ordinal index of the node within its cluster.
    pub node_id: usize,
    /// Host of the control-plane listener.
    pub host: String,
    /// Port of the control-plane listener.
    pub port: u16,
    /// Cluster identity tag the node was launched with.
    pub cloud_name: String,
}

impl NodeState {
    /// Returns the endpoint described by this state.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// Everything a launcher needs to start one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodePlan {
    /// Ordinal index of the node within its cluster.
    pub node_id: usize,
    /// Endpoint the node must listen on.
    pub endpoint: Endpoint,
    /// Cluster identity tag.
    pub cloud_name: String,
    /// Worker executable to launch.
    pub program: Utf8PathBuf,
    /// Extra arguments appended after the harness-owned flags.
    pub extra_args: Vec<String>,
    /// Peer-discovery file the node should read, when one was written.
    pub peer_file: Option<Utf8PathBuf>,
    /// Directory receiving the node's drained stdout/stderr.
    pub log_dir: Utf8PathBuf,
    /// Remote host to launch on; `None` means this host.
    pub remote: Option<RemoteHost>,
}

impl NodePlan {
    /// Builds the worker's argument vector: harness-owned flags first, then
    /// the caller's extras.
    #[must_use]
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("--port"),
            self.endpoint.port.to_string(),
            String::from("--cloud-name"),
            self.cloud_name.clone(),
        ];
        if let Some(peer_file) = &self.peer_file {
            args.push(String::from("--peer-file"));
            args.push(peer_file.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Capability set the harness needs from one cluster member.
pub trait NodeHandle: Send + Sync + std::fmt::Debug {
    /// Ordinal index of the node within its cluster.
    fn node_id(&self) -> usize;

    /// Control-plane endpoint of the node.
    fn endpoint(&self) -> &Endpoint;

    /// Cluster identity tag the node belongs to.
    fn cloud_name(&self) -> &str;

    /// Reports whether the node is still alive.
    fn is_alive(&self) -> NodeFuture<'_, bool>;

    /// Forcibly terminates the node. Graceful shutdown is the lifecycle
    /// manager's broadcast; this is the unconditional follow-up.
    fn terminate(&self) -> NodeFuture<'_, ()>;

    /// Serializable snapshot for descriptors.
    fn state(&self) -> NodeState;
}

/// Collaborator that turns a [`NodePlan`] into a live node.
pub trait NodeLauncher: Send + Sync {
    /// Starts the node described by `plan`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError`] when the process cannot be spawned or the plan
    /// is unusable.
    fn launch<'a>(&'a self, plan: &'a NodePlan) -> NodeFuture<'a, Box<dyn NodeHandle>>;
}
