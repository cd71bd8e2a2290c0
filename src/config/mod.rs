//! Harness configuration loading via `ortho-config`.
//!
//! Values merge defaults, `cumulus.toml`, `CUMULUS_*` environment variables,
//! and CLI flags in that order of precedence. Port plumbing keeps the
//! conventions tests rely on when several clusters share one machine: the
//! base port must stay inside the harness range and the per-shell offset is
//! bounded so parallel runs cannot collide.

use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::stabilize::RetryBudget;

/// Lowest base port the harness will use.
pub const BASE_PORT_MIN: u16 = 54_321;
/// Highest base port the harness will use.
pub const BASE_PORT_MAX: u16 = 54_999;
/// Smallest useful port offset; parallel runs need at least this much
/// spacing because each node claims two ports.
pub const PORT_OFFSET_MIN: u16 = 8;
/// Largest accepted port offset.
pub const PORT_OFFSET_MAX: u16 = 500;

/// Errors raised while loading or validating configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Raised when the loader fails to merge configuration sources.
    #[error("failed to load configuration: {0}")]
    Parse(String),
    /// Raised when a required value is missing.
    #[error("missing {0}: set CUMULUS_{1} or add {2} to cumulus.toml")]
    MissingField(&'static str, &'static str, &'static str),
    /// Raised when a numeric value is outside its accepted range.
    #[error("{field} is {value}; it must be between {low} and {high}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was rejected.
        value: u16,
        /// Lowest accepted value.
        low: u16,
        /// Highest accepted value.
        high: u16,
    },
}

/// Harness configuration derived from defaults, files, environment
/// variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CUMULUS")]
pub struct HarnessConfig {
    /// First control-plane port of the cluster. Must stay within the harness
    /// range so parallel shells can be offset apart.
    #[ortho_config(default = 54_321)]
    pub base_port: u16,
    /// Port offset for running several harness instances on one machine.
    /// Bounded to 8..=500; each node consumes two ports.
    pub port_offset: Option<u16>,
    /// Number of nodes to launch (per host, when remote hosts are given).
    #[ortho_config(default = 1)]
    pub node_count: usize,
    /// Cluster identity tag. Generated per build when absent, preventing
    /// accidental cross-joining of clusters on a shared network.
    pub cloud_name: Option<String>,
    /// Directory receiving per-node logs, the peer file, and descriptors.
    #[ortho_config(default = "sandbox".to_owned())]
    pub log_dir: String,
    /// Worker executable launched for every node.
    pub worker_bin: Option<String>,
    /// Extra arguments appended to every worker invocation.
    pub worker_args: Option<Vec<String>>,
    /// Remote hosts to launch on over SSH; empty means this host.
    pub hosts: Option<Vec<String>>,
    /// Wall-clock budget for cluster formation, in seconds.
    #[ortho_config(default = 30)]
    pub formation_timeout_secs: u64,
    /// Delay between stabilization attempts, in milliseconds.
    #[ortho_config(default = 1_000)]
    pub retry_delay_ms: u64,
    /// Shuffles the peer list and launch order for test variation.
    #[ortho_config(default = true)]
    pub shuffle: bool,
    /// Re-runs consensus stabilization against every node, not just the
    /// anchor.
    #[ortho_config(default = false)]
    pub conservative: bool,
    /// Suppresses the health assertions during membership verification.
    #[ortho_config(default = false)]
    pub ignore_health: bool,
    /// Downgrades sandbox log findings from errors to warnings.
    #[ortho_config(default = false)]
    pub sandbox_ignore_errors: bool,
    /// Name of the running test, used in log markers and diagnostics.
    pub test_name: Option<String>,
}

impl HarnessConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cumulus")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Resolves the first port of the cluster, applying the bounded offset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] when the base port or offset is
    /// outside its accepted range.
    pub fn effective_base_port(&self) -> Result<u16, ConfigError> {
        if !(BASE_PORT_MIN..=BASE_PORT_MAX).contains(&self.base_port) {
            return Err(ConfigError::OutOfRange {
                field: "base_port",
                value: self.base_port,
                low: BASE_PORT_MIN,
                high: BASE_PORT_MAX,
            });
        }
        let Some(offset) = self.port_offset else {
            return Ok(self.base_port);
        };
        if !(PORT_OFFSET_MIN..=PORT_OFFSET_MAX).contains(&offset) {
            return Err(ConfigError::OutOfRange {
                field: "port_offset",
                value: offset,
                low: PORT_OFFSET_MIN,
                high: PORT_OFFSET_MAX,
            });
        }
        self.base_port
            .checked_add(offset)
            .ok_or(ConfigError::OutOfRange {
                field: "port_offset",
                value: offset,
                low: PORT_OFFSET_MIN,
                high: PORT_OFFSET_MAX,
            })
    }

    /// Returns the sandbox directory as a UTF-8 path.
    #[must_use]
    pub fn resolved_log_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.log_dir)
    }

    /// Returns the configured cloud name, or generates a fresh one.
    #[must_use]
    pub fn resolved_cloud_name(&self) -> String {
        self.cloud_name
            .clone()
            .unwrap_or_else(generated_cloud_name)
    }

    /// Returns the worker executable path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no worker binary is
    /// configured.
    pub fn resolved_worker_bin(&self) -> Result<Utf8PathBuf, ConfigError> {
        self.worker_bin
            .as_deref()
            .map(Utf8PathBuf::from)
            .ok_or(ConfigError::MissingField(
                "worker executable",
                "WORKER_BIN",
                "worker_bin",
            ))
    }

    /// Returns the formation retry budget.
    #[must_use]
    pub const fn formation_budget(&self) -> RetryBudget {
        RetryBudget::new(
            Duration::from_secs(self.formation_timeout_secs),
            Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// Returns the test name, falling back to a stable placeholder.
    #[must_use]
    pub fn resolved_test_name(&self) -> String {
        self.test_name
            .clone()
            .unwrap_or_else(|| String::from("unnamed-run"))
    }
}

/// Generates a cluster tag unlikely to collide on a shared network.
fn generated_cloud_name() -> String {
    let user = env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("unknown"));
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    format!("cumulus-{user}-{suffix}")
}

#[cfg(test)]
mod tests;
