//! Command-line interface definitions for the `cumulus` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use clap::Parser;

/// Top-level CLI for the `cumulus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cumulus",
    about = "Launch, verify, and tear down an ephemeral compute cloud",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Build a cloud, write its descriptor, and hold it until interrupted.
    #[command(
        name = "up",
        about = "Build a cloud, write its descriptor, and hold it until Ctrl-C"
    )]
    Up(UpCommand),
    /// Attach to a cloud via its descriptor and verify its health.
    #[command(name = "status", about = "Attach via a descriptor and verify cloud health")]
    Status(StatusCommand),
    /// Attach to a cloud via its descriptor and tear it down.
    #[command(name = "down", about = "Attach via a descriptor and tear the cloud down")]
    Down(DownCommand),
}

/// Arguments for the `cumulus up` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct UpCommand {
    /// Number of nodes to launch, overriding the configured count.
    #[arg(long, value_name = "N")]
    pub(crate) nodes: Option<usize>,
    /// Cloud name to use, overriding the generated one.
    #[arg(long, value_name = "NAME")]
    pub(crate) cloud_name: Option<String>,
    /// Where to write the cloud descriptor.
    #[arg(long, value_name = "PATH", default_value = "cumulus-nodes.json")]
    pub(crate) descriptor: String,
}

/// Arguments for the `cumulus status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    /// Descriptor of the cloud to inspect.
    #[arg(long, value_name = "PATH", default_value = "cumulus-nodes.json")]
    pub(crate) descriptor: String,
}

/// Arguments for the `cumulus down` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DownCommand {
    /// Descriptor of the cloud to tear down.
    #[arg(long, value_name = "PATH", default_value = "cumulus-nodes.json")]
    pub(crate) descriptor: String,
    /// Suppress fatal log findings during teardown.
    #[arg(long)]
    pub(crate) ignore_errors: bool,
}
