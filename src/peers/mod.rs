//! Peer-discovery file handling and launch-order shuffling.
//!
//! The peer file is written exactly once per cluster build, before any node
//! starts, then read by every node; no concurrent-write protection is
//! needed. The peer list and the process start order can be shuffled
//! independently to exercise order-independence of cluster formation.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::control::Endpoint;

/// Ports reserved per node; workers claim their API port and the one above
/// it for internal traffic.
pub const PORTS_PER_NODE: u16 = 2;

/// Errors raised while preparing peer discovery.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PeersError {
    /// Raised when the peer file cannot be written.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the system entropy source fails.
    #[error("entropy source failed: {message}")]
    Entropy {
        /// Error message from the entropy source.
        message: String,
    },
    /// Raised when the requested port range would overflow.
    #[error("port range starting at {base_port} overflows for {node_count} nodes")]
    PortRange {
        /// First port of the range.
        base_port: u16,
        /// Number of nodes requested.
        node_count: usize,
    },
}

/// Computes the endpoint list for `node_count` nodes per host, spacing
/// ports by [`PORTS_PER_NODE`].
///
/// # Errors
///
/// Returns [`PeersError::PortRange`] when the ports would exceed `u16`.
pub fn peer_entries(
    hosts: &[String],
    node_count: usize,
    base_port: u16,
) -> Result<Vec<Endpoint>, PeersError> {
    let mut entries = Vec::with_capacity(hosts.len() * node_count);
    for host in hosts {
        for index in 0..node_count {
            let offset = u16::try_from(index)
                .ok()
                .and_then(|i| i.checked_mul(PORTS_PER_NODE))
                .and_then(|step| base_port.checked_add(step))
                .ok_or(PeersError::PortRange {
                    base_port,
                    node_count,
                })?;
            entries.push(Endpoint::new(host.clone(), offset));
        }
    }
    Ok(entries)
}

/// Draws a random index below `bound` from the system entropy source.
fn random_index(bound: usize) -> Result<usize, PeersError> {
    let mut buffer = [0u8; 8];
    getrandom::getrandom(&mut buffer).map_err(|err| PeersError::Entropy {
        message: err.to_string(),
    })?;
    let draw = u64::from_le_bytes(buffer);
    let bound_u64 = u64::try_from(bound).map_err(|err| PeersError::Entropy {
        message: err.to_string(),
    })?;
    usize::try_from(draw % bound_u64).map_err(|err| PeersError::Entropy {
        message: err.to_string(),
    })
}

/// Fisher–Yates shuffle on system entropy.
///
/// The example pack carries no dedicated RNG crate, so the shuffle draws
/// straight from `getrandom`; cluster sizes are small enough that one draw
/// per element is cheap.
///
/// # Errors
///
/// Returns [`PeersError::Entropy`] when the entropy source fails.
pub fn shuffle<T>(items: &mut [T]) -> Result<(), PeersError> {
    for index in (1..items.len()).rev() {
        let other = random_index(index + 1)?;
        items.swap(index, other);
    }
    Ok(())
}

/// Writes the peer-discovery file: one `host:port` line per entry.
///
/// # Errors
///
/// Returns [`PeersError::Io`] when the file cannot be written.
pub fn write_peer_file(path: &Utf8Path, entries: &[Endpoint]) -> Result<(), PeersError> {
    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&entry.to_string());
        contents.push('\n');
    }
    fs::write(path, contents).map_err(|err| PeersError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
