//! Cluster lifecycle: build, attach, verify, tear down.
//!
//! A [`ClusterHandle`] is a plain value owned by the caller; there is no
//! process-wide registry. Its lifetime is explicit: created by
//! [`ClusterManager::build_cluster`] (or reconstructed from a descriptor),
//! destroyed by [`ClusterManager::teardown`]. Callers serialise operations
//! against one cluster themselves; the manager adds no internal locking.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::control::{ControlClient, ControlTransport, Endpoint, HttpTransport};
use crate::formation::{
    FormationController, FormationOptions, MembershipReport, TEARDOWN_GRACE,
};
use crate::node::{
    ClonedNode, NodeHandle, NodeLauncher, NodePlan, NodeState, RemoteHost,
};
use crate::peers::{peer_entries, shuffle, write_peer_file};
use crate::sandbox::{SandboxMonitor, ScanOutcome};
use crate::stabilize::RetryBudget;

mod descriptor;
mod error;

pub use descriptor::{
    CloudDescriptor, CloudStart, DESCRIPTOR_FILE_NAME, DescriptorError, load_descriptor,
    parse_descriptor, write_descriptor,
};
pub use error::ClusterError;

/// Name of the peer-discovery file inside the sandbox directory.
pub const PEER_FILE_NAME: &str = "peers.txt";

/// Resolved inputs for one cluster build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterConfig {
    /// Number of nodes to launch per host.
    pub node_count: usize,
    /// First control-plane port.
    pub base_port: u16,
    /// Cluster identity tag.
    pub cloud_name: String,
    /// Sandbox directory for logs, the peer file, and descriptors.
    pub log_dir: Utf8PathBuf,
    /// Worker executable.
    pub program: Utf8PathBuf,
    /// Extra worker arguments.
    pub extra_args: Vec<String>,
    /// Remote launch targets; empty means this host.
    pub hosts: Vec<RemoteHost>,
    /// Stabilization budget for formation.
    pub budget: RetryBudget,
    /// Shuffle the peer list and launch order.
    pub shuffle: bool,
    /// Re-stabilize against every node after the anchor agrees.
    pub conservative: bool,
    /// Skip health assertions during verification.
    pub ignore_health: bool,
    /// Name of the running test.
    pub test_name: String,
}

impl ClusterConfig {
    /// Resolves a build configuration from the loaded harness config.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Config`] when the worker binary is missing or
    /// a port value is out of range.
    pub fn from_harness(config: &HarnessConfig) -> Result<Self, ClusterError> {
        Ok(Self {
            node_count: config.node_count,
            base_port: config.effective_base_port()?,
            cloud_name: config.resolved_cloud_name(),
            log_dir: config.resolved_log_dir(),
            program: config.resolved_worker_bin()?,
            extra_args: config.worker_args.clone().unwrap_or_default(),
            hosts: config
                .hosts
                .clone()
                .unwrap_or_default()
                .iter()
                .map(|spec| RemoteHost::parse(spec))
                .collect(),
            budget: config.formation_budget(),
            shuffle: config.shuffle,
            conservative: config.conservative,
            ignore_health: config.ignore_health,
            test_name: config.resolved_test_name(),
        })
    }
}

/// A live (or attached) cluster owned by the caller.
#[derive(Debug)]
pub struct ClusterHandle {
    nodes: Vec<Box<dyn NodeHandle>>,
    cloud_name: String,
}

impl ClusterHandle {
    /// Wraps launched nodes in a handle.
    #[must_use]
    pub fn new(nodes: Vec<Box<dyn NodeHandle>>, cloud_name: impl Into<String>) -> Self {
        Self {
            nodes,
            cloud_name: cloud_name.into(),
        }
    }

    /// The cluster's identity tag.
    #[must_use]
    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    /// All member handles, in node order.
    #[must_use]
    pub fn nodes(&self) -> &[Box<dyn NodeHandle>] {
        &self.nodes
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the handle holds no members (post-teardown).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The consensus anchor: the last-added node.
    #[must_use]
    pub fn anchor(&self) -> Option<&dyn NodeHandle> {
        self.nodes.last().map(AsRef::as_ref)
    }

    /// Control-plane endpoints of all members.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.nodes.iter().map(|n| n.endpoint().clone()).collect()
    }

    /// Serializable state snapshots of all members.
    #[must_use]
    pub fn states(&self) -> Vec<NodeState> {
        self.nodes.iter().map(|n| n.state()).collect()
    }

    /// Pings every member's liveness; returns `true` when all are alive.
    ///
    /// # Errors
    ///
    /// Returns the first liveness probe failure.
    pub async fn touch(&self) -> Result<bool, ClusterError> {
        for node in &self.nodes {
            if !node.is_alive().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Top-level orchestrator for cluster lifetimes.
#[derive(Clone, Debug)]
pub struct ClusterManager<T: ControlTransport> {
    client: ControlClient<T>,
    monitor: Arc<SandboxMonitor>,
}

impl ClusterManager<HttpTransport> {
    /// Creates a manager over the real HTTP transport.
    #[must_use]
    pub fn over_http(monitor: Arc<SandboxMonitor>) -> Self {
        Self::new(ControlClient::over_http(), monitor)
    }
}

impl<T: ControlTransport + 'static> ClusterManager<T> {
    /// Creates a manager; the client is wired to the monitor so transport
    /// failures surface crash context.
    #[must_use]
    pub fn new(client: ControlClient<T>, monitor: Arc<SandboxMonitor>) -> Self {
        Self {
            client: client.with_monitor(Arc::clone(&monitor)),
            monitor,
        }
    }

    /// Returns the manager's sandbox monitor.
    #[must_use]
    pub fn monitor(&self) -> Arc<SandboxMonitor> {
        Arc::clone(&self.monitor)
    }

    fn formation(&self) -> FormationController<T> {
        FormationController::new(self.client.clone()).with_monitor(Arc::clone(&self.monitor))
    }

    fn formation_options(&self, config: &ClusterConfig) -> FormationOptions {
        let mut options = FormationOptions::new(config.budget);
        options.conservative = config.conservative;
        options.ignore_health = config.ignore_health;
        options.expected_name = Some(config.cloud_name.clone());
        options
    }

    /// Launches a cluster cold and drives it through formation.
    ///
    /// The peer file is written once before any node starts; the peer list
    /// and the launch order are shuffled independently when enabled. On any
    /// failure every already-launched process is terminated, the sandbox is
    /// checked, and the original error is re-raised, so a half-formed
    /// cluster never outlives the call.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError`] for launch, formation, or peer-file
    /// failures.
    pub async fn build_cluster(
        &self,
        config: &ClusterConfig,
        launcher: &dyn NodeLauncher,
    ) -> Result<ClusterHandle, ClusterError> {
        std::fs::create_dir_all(&config.log_dir).map_err(|err| ClusterError::Io {
            path: config.log_dir.clone(),
            message: err.to_string(),
        })?;

        let host_names: Vec<String> = if config.hosts.is_empty() {
            vec![String::from("127.0.0.1")]
        } else {
            config.hosts.iter().map(|h| h.host.clone()).collect()
        };
        let endpoints = peer_entries(&host_names, config.node_count, config.base_port)?;

        let peer_file = config.log_dir.join(PEER_FILE_NAME);
        let mut peer_list = endpoints.clone();
        if config.shuffle {
            shuffle(&mut peer_list)?;
        }
        write_peer_file(&peer_file, &peer_list)?;

        // Launch order shuffles independently of the peer file so formation
        // is exercised against both orderings.
        let mut launch_order = endpoints;
        if config.shuffle {
            shuffle(&mut launch_order)?;
        }
        let plans: Vec<NodePlan> = launch_order
            .into_iter()
            .enumerate()
            .map(|(node_id, endpoint)| {
                let remote = config
                    .hosts
                    .iter()
                    .find(|host| host.host == endpoint.host)
                    .cloned();
                NodePlan {
                    node_id,
                    endpoint,
                    cloud_name: config.cloud_name.clone(),
                    program: config.program.clone(),
                    extra_args: config.extra_args.clone(),
                    peer_file: Some(peer_file.clone()),
                    log_dir: config.log_dir.clone(),
                    remote,
                }
            })
            .collect();

        info!(
            nodes = plans.len(),
            cloud_name = %config.cloud_name,
            base_port = config.base_port,
            "building cluster"
        );

        let mut nodes: Vec<Box<dyn NodeHandle>> = Vec::with_capacity(plans.len());
        for plan in &plans {
            match launcher.launch(plan).await {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    self.abandon(&nodes).await;
                    return Err(err.into());
                }
            }
        }

        let options = self.formation_options(config);
        match self.formation().form(&nodes, &options).await {
            Ok(report) => {
                debug!(sizes = ?report.sizes, "formation report");
            }
            Err(err) => {
                self.abandon(&nodes).await;
                return Err(err.into());
            }
        }

        // Leave a grep-able marker in the logs so failures can be tied back
        // to the test that built the cloud.
        if let Some(first) = nodes.first() {
            let marker = format!("=== test {} built this cloud ===", config.test_name);
            if let Err(err) = self.client.log_echo(first.endpoint(), &marker).await {
                debug!(error = %err, "log marker failed (ignored)");
            }
        }

        Ok(ClusterHandle::new(nodes, config.cloud_name.clone()))
    }

    /// Terminates every launched node after a failed build, checks the
    /// sandbox once, and swallows all cleanup failures so the original
    /// error propagates.
    async fn abandon(&self, nodes: &[Box<dyn NodeHandle>]) {
        for node in nodes {
            if let Err(err) = node.terminate().await {
                warn!(node = %node.endpoint(), error = %err, "cleanup terminate failed");
            }
        }
        if let Err(err) = self.monitor.check(false) {
            warn!(error = %err, "sandbox scan failed during cleanup");
        }
    }

    /// Reconstructs a handle purely from a validated descriptor; no process
    /// is launched and no connection is made until the handle is used.
    #[must_use]
    pub fn build_cluster_from_descriptor(&self, document: &CloudDescriptor) -> ClusterHandle {
        let nodes: Vec<Box<dyn NodeHandle>> = document
            .cloud_nodes
            .iter()
            .map(|state| {
                debug!(node_id = state.node_id, "cloning node state");
                Box::new(ClonedNode::from_state(state, self.client.clone()))
                    as Box<dyn NodeHandle>
            })
            .collect();
        let cloud_name = document
            .cloud_nodes
            .first()
            .map(|state| state.cloud_name.clone())
            .unwrap_or_default();
        info!(
            nodes = nodes.len(),
            cloud_name = %cloud_name,
            built_by = %document.cloud_start.username,
            "attached to existing cloud"
        );
        ClusterHandle::new(nodes, cloud_name)
    }

    /// Loads a descriptor from disk and attaches to the cloud it describes.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Descriptor`] when the file is missing,
    /// malformed, or incomplete.
    pub fn attach(&self, path: &Utf8Path) -> Result<ClusterHandle, ClusterError> {
        let document = load_descriptor(path)?;
        Ok(self.build_cluster_from_descriptor(&document))
    }

    /// Serializes a handle plus provenance to a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Descriptor`] when writing fails.
    pub fn write_descriptor(
        &self,
        path: &Utf8Path,
        handle: &ClusterHandle,
        cloud_start: CloudStart,
    ) -> Result<(), ClusterError> {
        let document = CloudDescriptor {
            cloud_start,
            cloud_nodes: handle.states(),
        };
        write_descriptor(path, &document)?;
        Ok(())
    }

    /// Queries every node once and asserts identical size, consensus,
    /// health, and (when given) cloud name. Idempotent on a healthy
    /// cluster.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Formation`] on any divergence.
    pub async fn verify_cluster_healthy(
        &self,
        handle: &ClusterHandle,
        expected_name: Option<&str>,
        ignore_health: bool,
    ) -> Result<MembershipReport, ClusterError> {
        let mut options =
            FormationOptions::new(RetryBudget::new(Duration::from_secs(10), Duration::from_secs(1)));
        options.ignore_health = ignore_health;
        options.expected_name = expected_name.map(ToOwned::to_owned);
        let report = self
            .formation()
            .verify_membership(handle.nodes(), &options)
            .await?;
        Ok(report)
    }

    /// Tears the cluster down unconditionally.
    ///
    /// Broadcasts a best-effort shutdown (network errors are swallowed; the
    /// receiving node dies mid-response), sleeps a short grace period,
    /// force-terminates every process handle (failures swallowed
    /// individually), runs exactly one sandbox check, and clears the handle.
    /// Teardown's own failures never propagate; the only error this method
    /// returns is the sandbox check surfacing fatal log patterns as the
    /// final signal.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Sandbox`] when fresh fatal patterns are
    /// found and `ignore_errors` is not set.
    pub async fn teardown(
        &self,
        handle: &mut ClusterHandle,
        ignore_errors: bool,
    ) -> Result<(), ClusterError> {
        for node in &handle.nodes {
            self.client.shutdown(node.endpoint()).await;
        }
        sleep(TEARDOWN_GRACE).await;
        for node in &handle.nodes {
            if let Err(err) = node.terminate().await {
                warn!(node = %node.endpoint(), error = %err, "terminate failed (ignored)");
            }
        }

        let signal = match self.monitor.check(ignore_errors) {
            Ok(ScanOutcome::ErrorsFound) => {
                if ignore_errors || self.monitor.ignores_errors() {
                    warn!("fatal log patterns found but suppressed by ignore policy");
                    Ok(())
                } else {
                    Err(ClusterError::Sandbox(
                        crate::sandbox::SandboxError::ErrorsDetected {
                            log_dir: self.monitor.log_dir().to_path_buf(),
                            test_name: self.monitor.test_name().to_owned(),
                        },
                    ))
                }
            }
            Ok(ScanOutcome::Clean | ScanOutcome::AlreadyReported) => Ok(()),
            Err(err) => {
                warn!(error = %err, "sandbox scan failed during teardown (ignored)");
                Ok(())
            }
        };

        handle.nodes.clear();
        info!(cloud_name = %handle.cloud_name, "cluster torn down");
        signal
    }
}

#[cfg(test)]
mod tests;
