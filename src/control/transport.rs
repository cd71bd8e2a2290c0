//! Transport abstraction between the control client and the wire.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::error::ControlError;
use super::types::{HttpMethod, WireRequest};

/// Future returned by transport operations.
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, ControlError>> + Send + 'a>>;

/// Abstraction over HTTP execution to support fakes in tests.
pub trait ControlTransport: Send + Sync {
    /// Executes one request and returns the decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] for connection failures, per-request
    /// timeouts, HTTP errors, and undecodable bodies.
    fn request<'a>(&'a self, request: &'a WireRequest) -> TransportFuture<'a>;
}

/// Real transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh HTTP client.
    ///
    /// No client-wide timeout is set; every request carries its own.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(url: &str, timeout_ms: u64, err: &reqwest::Error) -> ControlError {
    if err.is_connect() {
        return ControlError::Connection {
            url: url.to_owned(),
            message: err.to_string(),
        };
    }
    if err.is_timeout() {
        return ControlError::RequestTimeout {
            url: url.to_owned(),
            timeout_ms,
        };
    }
    ControlError::Http {
        url: url.to_owned(),
        message: err.to_string(),
    }
}

impl ControlTransport for HttpTransport {
    fn request<'a>(&'a self, request: &'a WireRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
            let builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };
            let response = builder
                .query(&request.params)
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|err| classify(&request.url, timeout_ms, &err))?
                .error_for_status()
                .map_err(|err| ControlError::Http {
                    url: request.url.clone(),
                    message: err.to_string(),
                })?;

            response
                .json::<Value>()
                .await
                .map_err(|err| ControlError::Decode {
                    url: request.url.clone(),
                    message: err.to_string(),
                })
        })
    }
}
