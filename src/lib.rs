//! Core library for the Cumulus cluster test harness.
//!
//! The crate launches a set of worker processes, waits for them to converge
//! into a single named compute cloud, drives asynchronous jobs through the
//! cloud's status/redirect polling protocol, and tears the cloud down
//! unconditionally (cold start → stabilize → verify → run jobs → destroy).

pub mod cluster;
pub mod config;
pub mod control;
pub mod formation;
pub mod job;
pub mod node;
pub mod peers;
pub mod sandbox;
pub mod stabilize;
pub mod test_support;

pub use cluster::{
    CloudDescriptor, CloudStart, ClusterConfig, ClusterError, ClusterHandle, ClusterManager,
    DESCRIPTOR_FILE_NAME, DescriptorError, PEER_FILE_NAME, load_descriptor, parse_descriptor,
};
pub use config::{ConfigError, HarnessConfig};
pub use control::{
    CloudStatus, ControlClient, ControlError, ControlTransport, Endpoint, HttpTransport,
    MemberInfo, RequestOptions,
};
pub use formation::{FormationController, FormationError, FormationOptions, MembershipReport};
pub use job::{JobError, Noise, PollConfig, poll_until_done};
pub use node::{
    ClonedNode, LocalNodeLauncher, LocalProcessNode, NodeError, NodeHandle, NodeLauncher,
    NodePlan, NodeState, RemoteHost, RemoteSshNode, SshNodeLauncher,
};
pub use sandbox::{LogScanner, PatternScanner, SandboxError, SandboxMonitor, ScanOutcome};
pub use stabilize::{RetryBudget, StabilizeError, stabilize};
