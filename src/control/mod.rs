//! Typed HTTP client for the per-node control-plane API.
//!
//! Every cluster and job operation routes through [`ControlClient`]. The
//! client is generic over a [`ControlTransport`] so tests can script
//! responses without a network; the real transport is [`HttpTransport`].
//!
//! Responses are scanned for the control plane's loosely spelled error and
//! warning fields: any truthy value under an error key raises (unless the
//! caller opts to ignore it), any truthy value under a warning key is logged.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::sandbox::{SandboxMonitor, ScanOutcome};

mod error;
mod transport;
mod types;

pub use error::ControlError;
pub use transport::{ControlTransport, HttpTransport, TransportFuture};
pub use types::{CloudStatus, Endpoint, HttpMethod, MemberInfo, WireRequest};

/// Location of the cluster status endpoint.
pub const STATUS_LOCATION: &str = "CloudStatus.json";
/// Location of the shutdown endpoint.
pub const SHUTDOWN_LOCATION: &str = "Shutdown.json";
/// Location of the log-marker echo endpoint.
pub const LOG_ECHO_LOCATION: &str = "LogEcho.json";
/// Location of the read-only store listing used as default noise traffic.
pub const STORE_VIEW_LOCATION: &str = "StoreView.json";

/// Default socket-level timeout for one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period before scanning logs after a transport failure, giving a
/// crashing node time to flush its final output.
const LOG_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Response keys treated as error carriers, in the spellings the control
/// plane actually emits.
const ERROR_KEYS: [&str; 4] = ["error", "Error", "errors", "Errors"];
/// Response keys treated as warning carriers.
const WARNING_KEYS: [&str; 4] = ["warning", "Warning", "warnings", "Warnings"];

/// Per-call request options.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// HTTP method to use.
    pub method: HttpMethod,
    /// Query parameters; entries with a `None` value are dropped before the
    /// request is built.
    pub params: Vec<(String, Option<String>)>,
    /// Socket-level timeout for this request.
    pub timeout: Duration,
    /// Suppresses the out-of-band log check on transport failure. Used while
    /// a node is expected to refuse connections.
    pub quiet: bool,
    /// Downgrades a remote error field from a raised error to a warning,
    /// returning the body so the caller can inspect it.
    pub ignore_remote_error: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            params: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            quiet: false,
            ignore_remote_error: false,
        }
    }
}

impl RequestOptions {
    /// Returns default options with the given timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Returns default options with the given timeout and quiet mode.
    #[must_use]
    pub fn quiet_with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            quiet: true,
            ..Self::default()
        }
    }
}

/// Typed request/response wrapper over a node's control-plane API.
#[derive(Debug)]
pub struct ControlClient<T: ControlTransport> {
    transport: Arc<T>,
    monitor: Option<Arc<SandboxMonitor>>,
}

impl<T: ControlTransport> Clone for ControlClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            monitor: self.monitor.clone(),
        }
    }
}

impl ControlClient<HttpTransport> {
    /// Creates a client over the real HTTP transport.
    #[must_use]
    pub fn over_http() -> Self {
        Self::new(Arc::new(HttpTransport::new()))
    }
}

impl<T: ControlTransport> ControlClient<T> {
    /// Creates a client over the given transport.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            monitor: None,
        }
    }

    /// Attaches a sandbox monitor consulted after transport failures.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<SandboxMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn transport(&self) -> Arc<T> {
        Arc::clone(&self.transport)
    }

    /// Issues a request to an absolute URL and scans the response flags.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] for transport failures, undecodable bodies,
    /// and truthy error fields (unless ignored via the options).
    pub async fn fetch(&self, url: String, options: &RequestOptions) -> Result<Value, ControlError> {
        let params = options
            .params
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (key.clone(), v.clone())))
            .collect();
        let request = WireRequest {
            method: options.method,
            url,
            params,
            timeout: options.timeout,
        };
        debug!(url = %request.url, "control-plane request");

        let body = match self.transport.request(&request).await {
            Ok(body) => body,
            Err(err) => {
                if err.is_transport() && !options.quiet {
                    self.surface_crash_context(&request.url).await;
                }
                return Err(err);
            }
        };

        scan_response_flags(&request.url, &body, options.ignore_remote_error)?;
        Ok(body)
    }

    /// Issues a request to a location on a node.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::fetch`].
    pub async fn fetch_at(
        &self,
        node: &Endpoint,
        location: &str,
        options: &RequestOptions,
    ) -> Result<Value, ControlError> {
        self.fetch(node.url_for(location), options).await
    }

    /// Fetches and decodes a node's cluster status snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Decode`] when the snapshot is missing required
    /// fields (including the member list), or any [`ControlError`] from the
    /// request itself.
    pub async fn cloud_status(
        &self,
        node: &Endpoint,
        timeout: Duration,
        quiet: bool,
    ) -> Result<CloudStatus, ControlError> {
        let url = node.url_for(STATUS_LOCATION);
        let options = if quiet {
            RequestOptions::quiet_with_timeout(timeout)
        } else {
            RequestOptions::with_timeout(timeout)
        };
        let body = self.fetch(url.clone(), &options).await?;
        serde_json::from_value(body).map_err(|err| ControlError::Decode {
            url,
            message: err.to_string(),
        })
    }

    /// Sends a best-effort shutdown request to a node.
    ///
    /// The receiving node dies mid-response by design, so every failure here
    /// is swallowed; callers that care about stragglers follow up with a
    /// forced terminate.
    pub async fn shutdown(&self, node: &Endpoint) {
        let options = RequestOptions::quiet_with_timeout(DEFAULT_REQUEST_TIMEOUT);
        if let Err(err) = self.fetch_at(node, SHUTDOWN_LOCATION, &options).await {
            debug!(node = %node, error = %err, "shutdown request failed (ignored)");
        }
    }

    /// Writes a marker message into a node's log via the echo endpoint.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::fetch`].
    pub async fn log_echo(&self, node: &Endpoint, message: &str) -> Result<(), ControlError> {
        let options = RequestOptions {
            params: vec![(String::from("message"), Some(message.to_owned()))],
            timeout: Duration::from_secs(15),
            ..RequestOptions::default()
        };
        self.fetch_at(node, LOG_ECHO_LOCATION, &options).await?;
        Ok(())
    }

    /// Submits an asynchronous operation and returns the raw submission
    /// response, suitable for handing to the job poller.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::fetch`].
    pub async fn submit(
        &self,
        node: &Endpoint,
        location: &str,
        params: Vec<(String, Option<String>)>,
        timeout: Duration,
    ) -> Result<Value, ControlError> {
        let options = RequestOptions {
            params,
            timeout,
            ..RequestOptions::default()
        };
        self.fetch_at(node, location, &options).await
    }

    /// Follows a poll continuation: a request to an absolute URL with
    /// already-concrete parameters.
    ///
    /// # Errors
    ///
    /// See [`ControlClient::fetch`].
    pub async fn request_url(
        &self,
        url: String,
        params: &[(String, String)],
        timeout: Duration,
    ) -> Result<Value, ControlError> {
        let options = RequestOptions {
            params: params
                .iter()
                .map(|(key, value)| (key.clone(), Some(value.clone())))
                .collect(),
            timeout,
            ..RequestOptions::default()
        };
        self.fetch(url, &options).await
    }

    /// On a transport failure against a node that should be up, give the
    /// process a moment to flush its logs, then run one sandbox scan so a
    /// fatal crash surfaces its root cause instead of a bare reset.
    async fn surface_crash_context(&self, url: &str) {
        let Some(monitor) = &self.monitor else {
            return;
        };
        sleep(LOG_SETTLE_DELAY).await;
        match monitor.check(false) {
            Ok(ScanOutcome::ErrorsFound) => {
                error!(url, "fatal patterns found in node logs after transport failure");
            }
            Ok(ScanOutcome::Clean | ScanOutcome::AlreadyReported) => {}
            Err(err) => warn!(url, error = %err, "sandbox scan failed"),
        }
    }
}

/// Scans a decoded response body for the control plane's error and warning
/// keys.
///
/// # Errors
///
/// Returns [`ControlError::Remote`] for the first truthy error key, unless
/// `ignore_remote_error` is set, in which case it is logged and the body is
/// accepted.
pub fn scan_response_flags(
    url: &str,
    body: &Value,
    ignore_remote_error: bool,
) -> Result<(), ControlError> {
    for key in ERROR_KEYS {
        if let Some(value) = body.get(key) {
            if is_truthy(value) {
                let detail = value.to_string();
                if ignore_remote_error {
                    warn!(url, key, %detail, "remote error ignored at caller request");
                    continue;
                }
                return Err(ControlError::Remote {
                    url: url.to_owned(),
                    key: key.to_owned(),
                    detail,
                });
            }
        }
    }
    for key in WARNING_KEYS {
        if let Some(value) = body.get(key) {
            if is_truthy(value) {
                warn!(url, key, detail = %value, "remote warning");
            }
        }
    }
    Ok(())
}

/// Truthiness matching the control plane's permissive conventions: absent,
/// null, `false`, zero, and empty strings/arrays/objects do not count.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests;
