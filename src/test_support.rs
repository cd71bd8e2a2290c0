//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};

use crate::control::{ControlError, ControlTransport, Endpoint, TransportFuture, WireRequest};
use crate::node::{NodeError, NodeFuture, NodeHandle, NodeLauncher, NodePlan, NodeState};
use crate::sandbox::{LogScanner, SandboxError, ScanRequest};

/// Builds a status-endpoint body with `cloud_size` healthy members.
#[must_use]
pub fn status_body(
    cloud_size: usize,
    consensus: bool,
    cloud_name: &str,
    node_name: &str,
) -> Value {
    let members: Vec<Value> = (0..cloud_size)
        .map(|index| json!({ "name": format!("node-{index}"), "node_healthy": true }))
        .collect();
    json!({
        "cloud_size": cloud_size,
        "consensus": consensus,
        "locked": false,
        "cloud_name": cloud_name,
        "node_name": node_name,
        "cloud_healthy": true,
        "nodes": members,
    })
}

/// Builds a status-endpoint body with one unhealthy member.
#[must_use]
pub fn unhealthy_status_body(cloud_size: usize, cloud_name: &str, node_name: &str) -> Value {
    let mut body = status_body(cloud_size, true, cloud_name, node_name);
    if let Some(first) = body
        .get_mut("nodes")
        .and_then(Value::as_array_mut)
        .and_then(|nodes| nodes.first_mut())
    {
        if let Some(member) = first.as_object_mut() {
            member.insert(String::from("node_healthy"), json!(false));
        }
    }
    body
}

/// Scripted control transport that returns pre-seeded responses in FIFO
/// order and records every request made through it.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    responses: Arc<StdMutex<VecDeque<Result<Value, ControlError>>>>,
    requests: Arc<StdMutex<Vec<WireRequest>>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON response body.
    pub fn push_json(&self, body: Value) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Ok(body));
        }
    }

    /// Queues a transport error.
    pub fn push_error(&self, error: ControlError) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(Err(error));
        }
    }

    /// Queues a connection-refused failure.
    pub fn push_connection_refused(&self) {
        self.push_error(ControlError::Connection {
            url: String::from("scripted"),
            message: String::from("connection refused"),
        });
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Returns how many requests have been made.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl ControlTransport for ScriptedTransport {
    fn request<'a>(&'a self, request: &'a WireRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }
            let next = self
                .responses
                .lock()
                .ok()
                .and_then(|mut responses| responses.pop_front());
            next.unwrap_or_else(|| {
                Err(ControlError::Http {
                    url: request.url.clone(),
                    message: String::from("no scripted response available"),
                })
            })
        })
    }
}

/// Scanner double that counts scans and returns a fixed outcome.
#[derive(Debug, Default)]
pub struct CountingScanner {
    found: bool,
    scans: AtomicUsize,
}

impl CountingScanner {
    /// Creates a scanner reporting `found` on every scan.
    #[must_use]
    pub const fn new(found: bool) -> Self {
        Self {
            found,
            scans: AtomicUsize::new(0),
        }
    }

    /// Returns how many scans have run.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Acquire)
    }
}

impl LogScanner for CountingScanner {
    fn scan(&self, _request: &ScanRequest<'_>) -> Result<bool, SandboxError> {
        self.scans.fetch_add(1, Ordering::AcqRel);
        Ok(self.found)
    }
}

/// Node double with scriptable liveness and terminate behaviour.
#[derive(Debug)]
pub struct ScriptedNode {
    node_id: usize,
    endpoint: Endpoint,
    cloud_name: String,
    alive: AtomicBool,
    fail_terminate: bool,
    terminations: Arc<AtomicUsize>,
}

impl ScriptedNode {
    /// Creates a live node double.
    #[must_use]
    pub fn new(node_id: usize, endpoint: Endpoint, cloud_name: impl Into<String>) -> Self {
        Self {
            node_id,
            endpoint,
            cloud_name: cloud_name.into(),
            alive: AtomicBool::new(true),
            fail_terminate: false,
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every terminate call fail.
    #[must_use]
    pub const fn failing_terminate(mut self) -> Self {
        self.fail_terminate = true;
        self
    }

    /// Shares a termination counter across several doubles.
    #[must_use]
    pub fn counting_into(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.terminations = counter;
        self
    }

    /// Returns how many times terminate was called.
    #[must_use]
    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::Acquire)
    }
}

impl NodeHandle for ScriptedNode {
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
        Box::pin(async move { Ok(self.alive.load(Ordering::Acquire)) })
    }

    fn terminate(&self) -> NodeFuture<'_, ()> {
        Box::pin(async move {
            self.terminations.fetch_add(1, Ordering::AcqRel);
            if self.fail_terminate {
                return Err(NodeError::Terminate {
                    node: self.endpoint.to_string(),
                    message: String::from("scripted terminate failure"),
                });
            }
            self.alive.store(false, Ordering::Release);
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

/// Launcher double that records plans and produces [`ScriptedNode`]s.
#[derive(Clone, Debug, Default)]
pub struct ScriptedLauncher {
    plans: Arc<StdMutex<Vec<NodePlan>>>,
    terminations: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl ScriptedLauncher {
    /// Creates a launcher that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the launch of the node with this ordinal fail.
    #[must_use]
    pub const fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Returns a snapshot of all launch plans seen so far.
    #[must_use]
    pub fn plans(&self) -> Vec<NodePlan> {
        self.plans
            .lock()
            .map(|plans| plans.clone())
            .unwrap_or_default()
    }

    /// Returns the total terminate calls across all launched doubles.
    #[must_use]
    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::Acquire)
    }
}

impl NodeLauncher for ScriptedLauncher {
    fn launch<'a>(&'a self, plan: &'a NodePlan) -> NodeFuture<'a, Box<dyn NodeHandle>> {
        Box::pin(async move {
            if let Ok(mut plans) = self.plans.lock() {
                plans.push(plan.clone());
            }
            if self.fail_at == Some(plan.node_id) {
                return Err(NodeError::Spawn {
                    program: plan.program.to_string(),
                    message: String::from("scripted launch failure"),
                });
            }
            let node = ScriptedNode::new(plan.node_id, plan.endpoint.clone(), &plan.cloud_name)
                .counting_into(Arc::clone(&self.terminations));
            Ok(Box::new(node) as Box<dyn NodeHandle>)
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
