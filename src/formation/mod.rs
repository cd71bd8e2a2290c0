//! Cluster formation: connection wait, consensus stabilization, and
//! membership verification.
//!
//! Formation always anchors on the last-added node: it joined last, so it is
//! the slowest to observe full membership, and a cloud it considers complete
//! is complete from every older member's perspective too.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::control::{ControlClient, ControlTransport, Endpoint};
use crate::node::NodeHandle;
use crate::sandbox::SandboxMonitor;
use crate::stabilize::{RetryBudget, StabilizeError, stabilize};

mod error;

pub use error::FormationError;

/// Grace period between the shutdown broadcast and forced termination.
pub(crate) const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Retry delay while waiting for a node to start accepting connections.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Knobs for one formation run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormationOptions {
    /// Stabilization budget shared by the connection and consensus waits.
    pub budget: RetryBudget,
    /// Socket-level timeout for each status request.
    pub status_timeout: Duration,
    /// Re-run consensus stabilization against every node after the anchor
    /// agrees, for extra confidence.
    pub conservative: bool,
    /// Skip the health assertions during verification.
    pub ignore_health: bool,
    /// Cloud name every member must report; `None` skips the check.
    pub expected_name: Option<String>,
}

impl FormationOptions {
    /// Creates options with the given budget and defaults elsewhere.
    #[must_use]
    pub const fn new(budget: RetryBudget) -> Self {
        Self {
            budget,
            status_timeout: Duration::from_secs(10),
            conservative: false,
            ignore_health: false,
            expected_name: None,
        }
    }
}

/// Per-node size and consensus vectors from a verification pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MembershipReport {
    /// Cloud size reported by each node, in node order.
    pub sizes: Vec<usize>,
    /// Consensus flag reported by each node, in node order.
    pub consensus: Vec<bool>,
    /// Member count the harness expected.
    pub expected: usize,
}

/// Broadcast shutdown, wait a grace period, then force-terminate every node.
/// Every failure is swallowed; this sweep must always run to completion.
pub(crate) async fn sweep_nodes<T: ControlTransport>(
    client: &ControlClient<T>,
    nodes: &[Box<dyn NodeHandle>],
    grace: Duration,
) {
    for node in nodes {
        client.shutdown(node.endpoint()).await;
    }
    sleep(grace).await;
    for node in nodes {
        if let Err(err) = node.terminate().await {
            warn!(node = %node.endpoint(), error = %err, "terminate failed (ignored)");
        }
    }
}

/// Drives a set of launched nodes to a verified cluster.
#[derive(Clone, Debug)]
pub struct FormationController<T: ControlTransport> {
    client: ControlClient<T>,
    monitor: Option<Arc<SandboxMonitor>>,
}

impl<T: ControlTransport> FormationController<T> {
    /// Creates a controller over the given client.
    #[must_use]
    pub const fn new(client: ControlClient<T>) -> Self {
        Self {
            client,
            monitor: None,
        }
    }

    /// Attaches a sandbox monitor consulted during long waits.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<SandboxMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Waits until `node` accepts connections and answers a status request.
    ///
    /// Connection-level errors are the retryable state; anything else the
    /// control plane raises is fatal and propagates immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::ConnectionTimeout`] on budget exhaustion,
    /// or the first non-connection [`FormationError::Control`] failure.
    pub async fn wait_for_connection(
        &self,
        node: &Endpoint,
        expected_cloud: &[Endpoint],
        options: &FormationOptions,
    ) -> Result<(), FormationError> {
        let expected = expected_cloud
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let result = stabilize(
            |_attempt| async move {
                match self
                    .client
                    .cloud_status(node, options.status_timeout, true)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(err) if err.is_connection() => Ok(false),
                    Err(err) => Err(FormationError::Control(err)),
                }
            },
            |_, _| format!("waiting for initial connection: expected cloud {expected}"),
            // Cold starts can be slow to bind, but a listening node answers
            // fast, so this wait retries more eagerly than the consensus one.
            RetryBudget::new(options.budget.timeout, CONNECT_RETRY_DELAY),
            self.monitor.as_deref(),
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(StabilizeError::Predicate(err)) => Err(err),
            Err(StabilizeError::Sandbox(err)) => Err(FormationError::Sandbox(err)),
            Err(timeout) => Err(FormationError::ConnectionTimeout {
                node: node.to_string(),
                message: timeout.to_string(),
            }),
        }
    }

    /// Waits until `anchor` reports the expected size with consensus.
    ///
    /// An observed size *larger* than expected fails immediately with
    /// [`FormationError::ZombieMembership`]; that state only gets worse, and
    /// raising promptly lets the caller hunt the stale process.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::ConsensusTimeout`] on budget exhaustion,
    /// [`FormationError::ZombieMembership`] on over-size, or any fatal
    /// control-plane failure.
    pub async fn await_consensus(
        &self,
        anchor: &Endpoint,
        expected: usize,
        options: &FormationOptions,
    ) -> Result<(), FormationError> {
        let result = stabilize(
            |_attempt| async move {
                let status = self
                    .client
                    .cloud_status(anchor, options.status_timeout, true)
                    .await
                    .map_err(FormationError::Control)?;
                if status.cloud_size > expected {
                    return Err(FormationError::ZombieMembership {
                        observed: status.cloud_size,
                        expected,
                        members: status.nodes.into_iter().map(|m| m.name).collect(),
                    });
                }
                if status.cloud_size != expected {
                    debug!(
                        anchor = %anchor,
                        seen = status.cloud_size,
                        expected,
                        "cloud still forming"
                    );
                }
                Ok(status.cloud_size == expected && status.consensus)
            },
            |_, _| format!("trying to build cloud of size {expected}"),
            options.budget,
            self.monitor.as_deref(),
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(StabilizeError::Predicate(err)) => Err(err),
            Err(StabilizeError::Sandbox(err)) => Err(FormationError::Sandbox(err)),
            Err(timeout) => Err(FormationError::ConsensusTimeout {
                expected,
                message: timeout.to_string(),
            }),
        }
    }

    /// Queries every node once and asserts the cluster is the one we built:
    /// identical sizes, full health, matching name.
    ///
    /// Safe to call repeatedly on a healthy cluster; it has no side effects
    /// until something diverges. A cloud-name mismatch tears the whole
    /// cluster down before raising so a half-formed cloud never outlives the
    /// harness as a zombie.
    ///
    /// # Errors
    ///
    /// Returns [`FormationError::MembershipMismatch`] on any divergence, or
    /// the first control-plane failure.
    pub async fn verify_membership(
        &self,
        nodes: &[Box<dyn NodeHandle>],
        options: &FormationOptions,
    ) -> Result<MembershipReport, FormationError> {
        let expected = nodes.len();
        if expected == 0 {
            return Err(FormationError::MembershipMismatch {
                message: String::from("nothing in the cloud; cannot verify size"),
            });
        }

        let mut statuses = Vec::with_capacity(expected);
        for node in nodes {
            let status = self
                .client
                .cloud_status(node.endpoint(), options.status_timeout, false)
                .await?;
            statuses.push(status);
        }

        if !options.ignore_health {
            for status in &statuses {
                if !status.cloud_healthy {
                    return Err(FormationError::MembershipMismatch {
                        message: format!(
                            "node {} reports cloud_healthy false",
                            status.node_name
                        ),
                    });
                }
                let unhealthy: Vec<&str> = status
                    .nodes
                    .iter()
                    .filter(|member| !member.node_healthy)
                    .map(|member| member.name.as_str())
                    .collect();
                if !unhealthy.is_empty() {
                    return Err(FormationError::MembershipMismatch {
                        message: format!(
                            "node {} says members are not healthy: {}",
                            status.node_name,
                            unhealthy.join(", ")
                        ),
                    });
                }
            }
        }

        let sizes: Vec<usize> = statuses.iter().map(|s| s.cloud_size).collect();
        let consensus: Vec<bool> = statuses.iter().map(|s| s.consensus).collect();
        if sizes.iter().any(|&size| size != expected) {
            return Err(FormationError::MembershipMismatch {
                message: format!(
                    "inconsistent cloud size: nodes report sizes {sizes:?} \
                     consensus {consensus:?} instead of {expected}"
                ),
            });
        }

        if let Some(expected_name) = options.expected_name.as_deref() {
            for (index, status) in statuses.iter().enumerate() {
                if status.cloud_name != expected_name {
                    warn!(
                        node = index,
                        reported = %status.cloud_name,
                        expected = expected_name,
                        "wrong cloud name; tearing the cluster down"
                    );
                    sweep_nodes(&self.client, nodes, TEARDOWN_GRACE).await;
                    if let Some(monitor) = &self.monitor {
                        if let Err(err) = monitor.check(false) {
                            warn!(error = %err, "sandbox scan failed during teardown");
                        }
                    }
                    return Err(FormationError::MembershipMismatch {
                        message: format!(
                            "node {index} has the wrong cloud name: {} expected: {expected_name}",
                            status.cloud_name
                        ),
                    });
                }
            }
        }

        Ok(MembershipReport {
            sizes,
            consensus,
            expected,
        })
    }

    /// Runs the full formation sequence over freshly launched nodes.
    ///
    /// Anchored on the last-added node: connection wait, consensus wait,
    /// optionally consensus against every node, then verification.
    ///
    /// # Errors
    ///
    /// Propagates the first [`FormationError`]; the caller owns cleanup of
    /// the launched processes.
    pub async fn form(
        &self,
        nodes: &[Box<dyn NodeHandle>],
        options: &FormationOptions,
    ) -> Result<MembershipReport, FormationError> {
        let anchor = nodes
            .last()
            .ok_or_else(|| FormationError::MembershipMismatch {
                message: String::from("no nodes were launched"),
            })?;
        let endpoints: Vec<Endpoint> =
            nodes.iter().map(|node| node.endpoint().clone()).collect();

        self.wait_for_connection(anchor.endpoint(), &endpoints, options)
            .await?;
        self.await_consensus(anchor.endpoint(), nodes.len(), options)
            .await?;
        if options.conservative {
            for node in nodes {
                self.await_consensus(node.endpoint(), nodes.len(), options)
                    .await?;
            }
        }
        let report = self.verify_membership(nodes, options).await?;
        info!(
            size = report.expected,
            anchor = %anchor.endpoint(),
            "cloud formed and verified"
        );
        Ok(report)
    }
}
