//! Workers launched on a remote host through the system `ssh` client.
//!
//! Embedding an SSH library is deliberately avoided; the host's own client
//! handles authentication, known-hosts policy, and agent forwarding. The
//! remote worker's stdout/stderr arrive on the local `ssh` process and are
//! drained the same way as for local nodes.

use std::process::Stdio;

use shell_escape::unix::escape;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::control::Endpoint;

use super::local::drain_to_file;
use super::{NodeError, NodeFuture, NodeHandle, NodeLauncher, NodePlan, NodeState};

/// SSH coordinates of a remote launch target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteHost {
    /// Host name or address to connect to.
    pub host: String,
    /// SSH port, normally 22.
    pub ssh_port: u16,
    /// Login user; the client's configuration applies when absent.
    pub user: Option<String>,
}

impl RemoteHost {
    /// Creates a remote host on the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ssh_port: 22,
            user: None,
        }
    }

    /// Parses a `user@host` launch target; a bare host is accepted too.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        spec.split_once('@').map_or_else(
            || Self::new(spec),
            |(user, host)| Self {
                host: host.to_owned(),
                ssh_port: 22,
                user: Some(user.to_owned()),
            },
        )
    }

    fn target(&self) -> String {
        self.user.as_ref().map_or_else(
            || self.host.clone(),
            |user| format!("{user}@{}", self.host),
        )
    }
}

/// Builds the single shell-escaped command string executed on the remote
/// side.
fn remote_command(plan: &NodePlan) -> String {
    let mut parts = vec![escape(plan.program.as_str().into()).into_owned()];
    for arg in plan.worker_args() {
        parts.push(escape(arg.into()).into_owned());
    }
    parts.join(" ")
}

/// A worker launched over SSH.
///
/// The handle owns the local `ssh` process. Terminating it drops the
/// connection; the remote worker is expected to exit with it, and the
/// shutdown broadcast plus the reaper cover stragglers.
pub struct RemoteSshNode {
    node_id: usize,
    endpoint: Endpoint,
    cloud_name: String,
    child: Mutex<Child>,
    _drains: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RemoteSshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSshNode")
            .field("node_id", &self.node_id)
            .field("endpoint", &self.endpoint)
            .field("cloud_name", &self.cloud_name)
            .finish_non_exhaustive()
    }
}

impl RemoteSshNode {
    /// Launches the worker described by `plan` on `plan.remote`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidPlan`] when the plan carries no remote
    /// host, [`NodeError::Io`] when the log directory cannot be created, and
    /// [`NodeError::Spawn`] when the `ssh` client fails to start.
    pub async fn launch(plan: &NodePlan) -> Result<Self, NodeError> {
        let remote = plan.remote.as_ref().ok_or_else(|| NodeError::InvalidPlan {
            node_id: plan.node_id,
            message: String::from("remote launch requested without a remote host"),
        })?;

        tokio::fs::create_dir_all(&plan.log_dir)
            .await
            .map_err(|err| NodeError::Io {
                path: plan.log_dir.clone(),
                message: err.to_string(),
            })?;

        let command_line = remote_command(plan);
        let mut child = Command::new("ssh")
            .arg("-p")
            .arg(remote.ssh_port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(remote.target())
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| NodeError::Spawn {
                program: String::from("ssh"),
                message: err.to_string(),
            })?;

        let prefix = format!("remote-node-{}-{}", plan.node_id, remote.host);
        let mut drains = Vec::with_capacity(2);
        if let Some(handle) = drain_to_file(
            child.stdout.take(),
            plan.log_dir.join(format!("{prefix}.stdout.log")),
        ) {
            drains.push(handle);
        }
        if let Some(handle) = drain_to_file(
            child.stderr.take(),
            plan.log_dir.join(format!("{prefix}.stderr.log")),
        ) {
            drains.push(handle);
        }

        debug!(node_id = plan.node_id, host = %remote.host, %command_line, "remote node spawned");
        Ok(Self {
            node_id: plan.node_id,
            endpoint: plan.endpoint.clone(),
            cloud_name: plan.cloud_name.clone(),
            child: Mutex::new(child),
            _drains: drains,
        })
    }
}

impl NodeHandle for RemoteSshNode {
    fn node_id(&self) -> usize {
        self.node_id
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    fn is_alive(&self) -> NodeFuture<'_, bool> {
        Box::pin(async move {
            let mut child = self.child.lock().await;
            match child.try_wait() {
                Ok(None) => Ok(true),
                Ok(Some(_)) => Ok(false),
                Err(err) => Err(NodeError::Terminate {
                    node: self.endpoint.to_string(),
                    message: err.to_string(),
                }),
            }
        })
    }

    fn terminate(&self) -> NodeFuture<'_, ()> {
        Box::pin(async move {
            let mut child = self.child.lock().await;
            child.kill().await.map_err(|err| NodeError::Terminate {
                node: self.endpoint.to_string(),
                message: err.to_string(),
            })
        })
    }

    fn state(&self) -> NodeState {
        NodeState {
            node_id: self.node_id,
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            cloud_name: self.cloud_name.clone(),
        }
    }
}

/// Launcher for nodes on remote hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct SshNodeLauncher;

impl NodeLauncher for SshNodeLauncher {
    fn launch<'a>(&'a self, plan: &'a NodePlan) -> NodeFuture<'a, Box<dyn NodeHandle>> {
        Box::pin(async move {
            let node = RemoteSshNode::launch(plan).await?;
            Ok(Box::new(node) as Box<dyn NodeHandle>)
        })
    }
}
