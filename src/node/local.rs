//! Locally spawned worker processes.

use std::process::Stdio;

use camino::Utf8PathBuf;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::control::Endpoint;

use super::{NodeError, NodeFuture, NodeHandle, NodeLauncher, NodePlan, NodeState};

/// A worker process launched on this host.
///
/// Stdout and stderr are drained into per-node log files by background
/// tasks, so the controller's blocking control-plane calls are never stalled
/// by a full OS pipe buffer.
pub struct LocalProcessNode {
    node_id: usize,
    endpoint: Endpoint,
    cloud_name: String,
    child: Mutex<Child>,
    _drains: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for LocalProcessNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessNode")
            .field("node_id", &self.node_id)
            .field("endpoint", &self.endpoint)
            .field("cloud_name", &self.cloud_name)
            .finish_non_exhaustive()
    }
}

pub(super) fn drain_to_file<R>(reader: Option<R>, path: Utf8PathBuf) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        match tokio::fs::File::create(&path).await {
            Ok(mut file) => {
                if let Err(err) = tokio::io::copy(&mut reader, &mut file).await {
                    debug!(path = %path, error = %err, "output drain ended");
                }
            }
            Err(err) => warn!(path = %path, error = %err, "could not create drain file"),
        }
    }))
}

impl LocalProcessNode {
    /// Spawns the worker described by `plan` on this host.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] when the log directory cannot be created
    /// and [`NodeError::Spawn`] when the process fails to start.
    pub async fn launch(plan: &NodePlan) -> Result<Self, NodeError> {
        tokio::fs::create_dir_all(&plan.log_dir)
            .await
            .map_err(|err| NodeError::Io {
                path: plan.log_dir.clone(),
                message: err.to_string(),
            })?;

        let mut child = Command::new(plan.program.as_str())
            .args(plan.worker_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| NodeError::Spawn {
                program: plan.program.to_string(),
                message: err.to_string(),
            })?;

        let prefix = format!("local-node-{}", plan.node_id);
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

        debug!(node_id = plan.node_id, endpoint = %plan.endpoint, "local node spawned");
        Ok(Self {
            node_id: plan.node_id,
            endpoint: plan.endpoint.clone(),
            cloud_name: plan.cloud_name.clone(),
            child: Mutex::new(child),
            _drains: drains,
        })
    }
}

impl NodeHandle for LocalProcessNode {
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

/// Launcher for nodes on this host.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalNodeLauncher;

impl NodeLauncher for LocalNodeLauncher {
    fn launch<'a>(&'a self, plan: &'a NodePlan) -> NodeFuture<'a, Box<dyn NodeHandle>> {
        Box::pin(async move {
            let node = LocalProcessNode::launch(plan).await?;
            Ok(Box::new(node) as Box<dyn NodeHandle>)
        })
    }
}
