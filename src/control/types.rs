//! Wire types for the node control-plane API.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host and port of one node's control-plane listener.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port of the control-plane API.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Builds the full URL for a control-plane location.
    ///
    /// Locations that are already absolute URLs are returned unchanged;
    /// otherwise the location is appended to this endpoint's base URL with a
    /// single separating slash.
    #[must_use]
    pub fn url_for(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            return location.to_owned();
        }
        let delimiter = if location.starts_with('/') { "" } else { "/" };
        format!("http://{}:{}{delimiter}{location}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// HTTP method used for a control-plane request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HttpMethod {
    /// Plain GET with query parameters.
    #[default]
    Get,
    /// POST with query parameters.
    Post,
}

/// A fully assembled control-plane request handed to the transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL of the request.
    pub url: String,
    /// Query parameters, already filtered of absent values.
    pub params: Vec<(String, String)>,
    /// Socket-level timeout for this single request.
    pub timeout: Duration,
}

/// Point-in-time cluster snapshot returned by a node's status endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudStatus {
    /// Number of members this node currently sees.
    pub cloud_size: usize,
    /// Whether this node believes the membership list is final.
    pub consensus: bool,
    /// Whether further membership changes are refused.
    pub locked: bool,
    /// Cluster identity tag.
    pub cloud_name: String,
    /// Name of the responding node.
    pub node_name: String,
    /// Whether this node considers the whole cloud healthy.
    pub cloud_healthy: bool,
    /// Per-member details as seen by the responding node.
    pub nodes: Vec<MemberInfo>,
}

/// Per-member health entry inside a [`CloudStatus`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemberInfo {
    /// Member name as reported by the cloud.
    pub name: String,
    /// Whether the member reports itself healthy.
    pub node_healthy: bool,
}
