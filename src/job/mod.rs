//! Asynchronous job polling over the status/redirect protocol.
//!
//! A submitted job answers with one of two shapes the control plane has
//! accumulated over time: the structured `response_info` form carrying a
//! `redirect_url`, and the legacy `response` form carrying a
//! `redirect_request` plus its argument map. The poller treats both
//! uniformly. Status values form a small machine: `poll` keeps polling the
//! same place, `redirect` moves to a new location, `done` is terminal. One
//! carve-out: a redirect whose target names an inspect view is a deliberate
//! handoff to the caller, not a continuation, and is never followed.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::control::{ControlClient, ControlTransport, Endpoint, STORE_VIEW_LOCATION};
use crate::sandbox::SandboxMonitor;

mod error;

pub use error::JobError;

/// How often (in poll iterations) the poller runs an out-of-band log check.
pub const SANDBOX_CHECK_CADENCE: u32 = 6;

/// Marker in a redirect target that stops automatic following.
const HANDOFF_MARKER: &str = "Inspect";

/// Unrelated read-only traffic issued on alternating poll iterations to
/// exercise the cloud while a job runs. Responses are discarded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Noise {
    /// Location of the read-only endpoint.
    pub location: String,
    /// Query parameters for the noise request.
    pub params: Vec<(String, String)>,
}

impl Noise {
    /// Noise that lists the cloud's store.
    #[must_use]
    pub fn store_view() -> Self {
        Self {
            location: String::from(STORE_VIEW_LOCATION),
            params: Vec::new(),
        }
    }
}

/// Budgets and options for one polling run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollConfig {
    /// Overall wall-clock budget across all polls.
    pub timeout: Duration,
    /// Sleep between poll iterations.
    pub retry_delay: Duration,
    /// Optional sleep before the first poll, for jobs known to take at
    /// least this long.
    pub initial_delay: Option<Duration>,
    /// Socket-level timeout for each individual poll request.
    pub poll_timeout: Duration,
    /// Optional noise traffic.
    pub noise: Option<Noise>,
    /// Return the submission response immediately without polling.
    pub no_poll: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(500),
            initial_delay: None,
            poll_timeout: Duration::from_secs(180),
            noise: None,
            no_poll: false,
        }
    }
}

impl PollConfig {
    /// Returns a config with the given overall timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Sets the delay between poll iterations.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Enables noise traffic.
    #[must_use]
    pub fn noise(mut self, noise: Noise) -> Self {
        self.noise = Some(noise);
        self
    }
}

/// Where the next poll request goes.
#[derive(Clone, Debug, Eq, PartialEq)]
struct PollTarget {
    url: String,
    params: Vec<(String, String)>,
}

/// Status, progress, and continuation extracted from one response.
#[derive(Clone, Debug, Eq, PartialEq)]
struct JobView {
    status: String,
    progress: String,
    target: Option<PollTarget>,
}

impl JobView {
    fn is_handoff(&self) -> bool {
        self.status == "redirect"
            && self
                .target
                .as_ref()
                .is_some_and(|target| target.url.contains(HANDOFF_MARKER))
    }

    fn should_continue(&self, first_poll: bool) -> bool {
        if self.is_handoff() {
            return false;
        }
        self.status == "poll" || first_poll || self.status == "redirect"
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Extracts the poller's view from either response shape.
fn job_view(origin: &Endpoint, body: &Value) -> Result<JobView, JobError> {
    if let Some(info) = body.get("response_info") {
        let status = info
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| JobError::Protocol {
                message: String::from("'response_info' is missing 'status'"),
            })?
            .to_owned();
        let progress = body.get("progress").map(text_of).unwrap_or_default();

        if status == "done" {
            return Ok(JobView {
                status,
                progress,
                target: None,
            });
        }
        let redirect = info.get("redirect_url").ok_or_else(|| JobError::Protocol {
            message: String::from("response during polling must have 'redirect_url'"),
        })?;
        let Some(url) = redirect.as_str() else {
            return Err(JobError::Protocol {
                message: format!(
                    "'redirect_url' during polling is null but status is '{status}'"
                ),
            });
        };
        return Ok(JobView {
            status,
            progress,
            target: Some(PollTarget {
                url: origin.url_for(url),
                params: Vec::new(),
            }),
        });
    }

    let Some(response) = body.get("response") else {
        return Err(JobError::Protocol {
            message: String::from("job response carries neither 'response_info' nor 'response'"),
        });
    };
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| JobError::Protocol {
            message: String::from("'response' is missing 'status'"),
        })?
        .to_owned();
    let progress = response.get("progress").map(text_of).unwrap_or_default();

    if status == "done" {
        return Ok(JobView {
            status,
            progress,
            target: None,
        });
    }
    let request = response
        .get("redirect_request")
        .and_then(Value::as_str)
        .ok_or_else(|| JobError::Protocol {
            message: String::from("'redirect_request' not in response"),
        })?;
    let params = response
        .get("redirect_request_args")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(key, value)| (key.clone(), text_of(value)))
                .collect()
        })
        .unwrap_or_default();
    Ok(JobView {
        status,
        progress,
        target: Some(PollTarget {
            url: origin.url_for(request),
            params,
        }),
    })
}

fn render_params(params: &[(String, String)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let rendered = params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{rendered}")
}

/// Drives a submitted job through the status/redirect protocol until it
/// reports completion, and returns the final response.
///
/// `initial` is the submission response. In `no_poll` mode it is returned
/// immediately; otherwise the poller follows the protocol under the overall
/// timeout, issuing noise traffic on alternating iterations when configured
/// and checking the sandbox logs every [`SANDBOX_CHECK_CADENCE`] iterations.
/// A redirect whose target names an inspect view is returned to the caller
/// instead of being followed.
///
/// # Errors
///
/// Returns [`JobError::PollTimeout`] when the overall budget is exceeded,
/// [`JobError::Protocol`] for malformed responses, and any control-plane or
/// sandbox failure.
pub async fn poll_until_done<T: ControlTransport>(
    client: &ControlClient<T>,
    origin: &Endpoint,
    initial: Value,
    config: &PollConfig,
    monitor: Option<&SandboxMonitor>,
) -> Result<Value, JobError> {
    let mut view = job_view(origin, &initial)?;
    if config.no_poll {
        return Ok(initial);
    }

    let start = Instant::now();
    let mut iteration: u32 = 0;
    let mut first_poll = view.status != "done";
    let mut last = initial;

    if let Some(delay) = config.initial_delay {
        sleep(delay).await;
    }

    while view.should_continue(first_poll) {
        iteration = iteration.saturating_add(1);
        if start.elapsed() > config.timeout {
            let (url, params) = view.target.as_ref().map_or_else(
                || (String::from("<none>"), String::new()),
                |target| (target.url.clone(), render_params(&target.params)),
            );
            return Err(JobError::PollTimeout {
                timeout: config.timeout,
                status: view.status.clone(),
                url,
                params,
            });
        }

        let noise_turn = config.noise.is_some() && iteration % 2 == 0;
        let noise_request = if noise_turn { config.noise.as_ref() } else { None };
        let (url, params) = if let Some(noise) = noise_request {
            (origin.url_for(&noise.location), noise.params.clone())
        } else {
            let target = view.target.as_ref().ok_or_else(|| JobError::Protocol {
                message: format!("status '{}' without a poll target", view.status),
            })?;
            (target.url.clone(), target.params.clone())
        };

        debug!(status = %view.status, progress = %view.progress, %url, "polling");
        sleep(config.retry_delay).await;
        let response = client.request_url(url, &params, config.poll_timeout).await?;

        if iteration % SANDBOX_CHECK_CADENCE == 0 {
            if let Some(monitor) = monitor {
                monitor.assert_clean(false)?;
            }
        }

        if noise_turn {
            // Noise never advances the job; the response is discarded and
            // the next iteration polls the real target again.
            continue;
        }

        first_poll = false;
        view = job_view(origin, &response)?;
        last = response;
    }

    Ok(last)
}
