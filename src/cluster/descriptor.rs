//! Cluster descriptors: serialized node state plus build provenance.
//!
//! A descriptor lets a later run attach to a cloud built out-of-band: the
//! `cloud_start` section records how and where the cloud was built, the
//! `cloud_nodes` section carries one state snapshot per member. Parsing
//! checks each required provenance key explicitly so a stale or truncated
//! file fails with the missing key's name instead of a generic decode error.

use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::node::NodeState;

/// Default descriptor file name, written into the sandbox directory.
pub const DESCRIPTOR_FILE_NAME: &str = "cumulus-nodes.json";

/// Keys every `cloud_start` section must carry. `config_path` may be null
/// but the key itself must be present.
const REQUIRED_START_KEYS: [&str; 7] = [
    "time",
    "cwd",
    "test_name",
    "command_line",
    "config_path",
    "username",
    "ip",
];

/// Errors raised while reading or validating a descriptor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when the descriptor file cannot be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the document is not valid JSON or does not match the
    /// descriptor schema (including unknown node-state fields).
    #[error("cannot parse descriptor: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
    /// Raised when a top-level section is absent.
    #[error("cannot find '{section}' in descriptor; wrong file?")]
    MissingSection {
        /// Name of the absent section.
        section: &'static str,
    },
    /// Raised when a required provenance key is absent.
    #[error("cannot find '{field}' in cloud_start; wrong file or version change?")]
    MissingField {
        /// Name of the absent key.
        field: &'static str,
    },
    /// Raised when the node list is empty.
    #[error("descriptor node list is empty; file must be corrupt")]
    EmptyNodes,
}

/// Provenance of a cluster build.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudStart {
    /// Unix timestamp (seconds) of the build.
    pub time: String,
    /// Working directory the harness ran in.
    pub cwd: String,
    /// Name of the test that built the cloud.
    pub test_name: String,
    /// Command line of the building process.
    pub command_line: String,
    /// Configuration file in effect, when one was used.
    pub config_path: Option<String>,
    /// User who built the cloud.
    pub username: String,
    /// Address the harness ran from.
    pub ip: String,
}

impl CloudStart {
    /// Captures provenance for the current process.
    #[must_use]
    pub fn capture(test_name: &str, config_path: Option<String>) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or_else(|_| String::from("0"), |d| d.as_secs().to_string());
        let cwd = env::current_dir()
            .map_or_else(|_| String::from("?"), |dir| dir.display().to_string());
        let command_line = env::args().collect::<Vec<_>>().join(" ");
        let username = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| String::from("unknown"));
        Self {
            time,
            cwd,
            test_name: test_name.to_owned(),
            command_line,
            config_path,
            username,
            ip: String::from("127.0.0.1"),
        }
    }
}

/// A complete serialized cluster.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudDescriptor {
    /// How the cloud was built.
    pub cloud_start: CloudStart,
    /// One state snapshot per member, in node order.
    pub cloud_nodes: Vec<NodeState>,
}

/// Parses and validates a descriptor document.
///
/// # Errors
///
/// Returns [`DescriptorError::MissingSection`]/[`DescriptorError::MissingField`]
/// naming the absent piece, [`DescriptorError::EmptyNodes`] for an empty
/// node list, and [`DescriptorError::Parse`] for anything undecodable.
pub fn parse_descriptor(text: &str) -> Result<CloudDescriptor, DescriptorError> {
    let document: Value = serde_json::from_str(text).map_err(|err| DescriptorError::Parse {
        message: err.to_string(),
    })?;

    let start = document
        .get("cloud_start")
        .ok_or(DescriptorError::MissingSection {
            section: "cloud_start",
        })?;
    for key in REQUIRED_START_KEYS {
        if start.get(key).is_none() {
            return Err(DescriptorError::MissingField { field: key });
        }
    }

    let nodes = document
        .get("cloud_nodes")
        .ok_or(DescriptorError::MissingSection {
            section: "cloud_nodes",
        })?;
    if nodes.as_array().is_none_or(Vec::is_empty) {
        return Err(DescriptorError::EmptyNodes);
    }

    serde_json::from_value(document).map_err(|err| DescriptorError::Parse {
        message: err.to_string(),
    })
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), DescriptorError> {
    let file_name = path.file_name().ok_or_else(|| DescriptorError::Io {
        path: path.to_path_buf(),
        message: String::from("path has no file name"),
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Ok((parent, file_name))
}

/// Loads and validates a descriptor from disk.
///
/// # Errors
///
/// Returns [`DescriptorError::Io`] when the file cannot be read, plus any
/// validation error from [`parse_descriptor`].
pub fn load_descriptor(path: &Utf8Path) -> Result<CloudDescriptor, DescriptorError> {
    let (parent, file_name) = split_path(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    let text = dir
        .read_to_string(file_name)
        .map_err(|err| DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    parse_descriptor(&text)
}

/// Writes a descriptor to disk as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`DescriptorError::Io`] when the file cannot be written and
/// [`DescriptorError::Parse`] when serialization fails.
pub fn write_descriptor(
    path: &Utf8Path,
    descriptor: &CloudDescriptor,
) -> Result<(), DescriptorError> {
    let json =
        serde_json::to_string_pretty(descriptor).map_err(|err| DescriptorError::Parse {
            message: err.to_string(),
        })?;
    let (parent, file_name) = split_path(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    dir.write(file_name, json).map_err(|err| DescriptorError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
