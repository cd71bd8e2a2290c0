//! Nodes reconstructed from a descriptor.

use std::time::Duration;

use crate::control::{ControlClient, ControlTransport, Endpoint};

use super::{NodeFuture, NodeHandle, NodeState};

/// Liveness probe timeout for cloned nodes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A cluster member built by someone else, reached purely through its
/// control-plane API.
///
/// There is no process handle: liveness is a status probe and termination is
/// a best-effort shutdown request.
pub struct ClonedNode<T: ControlTransport> {
    node_id: usize,
    endpoint: Endpoint,
    cloud_name: String,
    client: ControlClient<T>,
}

impl<T: ControlTransport> Clone for ClonedNode<T> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id,
            endpoint: self.endpoint.clone(),
            cloud_name: self.cloud_name.clone(),
            client: self.client.clone(),
        }
    }
}

impl<T: ControlTransport> std::fmt::Debug for ClonedNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClonedNode")
            .field("node_id", &self.node_id)
            .field("endpoint", &self.endpoint)
            .field("cloud_name", &self.cloud_name)
            .finish_non_exhaustive()
    }
}

impl<T: ControlTransport> ClonedNode<T> {
    /// Reconstructs a node handle from serialized state.
    #[must_use]
    pub fn from_state(state: &NodeState, client: ControlClient<T>) -> Self {
        Self {
            node_id: state.node_id,
            endpoint: state.endpoint(),
            cloud_name: state.cloud_name.clone(),
            client,
        }
    }
}

impl<T: ControlTransport + 'static> NodeHandle for ClonedNode<T> {
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
            Ok(self
                .client
                .cloud_status(&self.endpoint, PROBE_TIMEOUT, true)
                .await
                .is_ok())
        })
    }

    fn terminate(&self) -> NodeFuture<'_, ()> {
        Box::pin(async move {
            self.client.shutdown(&self.endpoint).await;
            Ok(())
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
