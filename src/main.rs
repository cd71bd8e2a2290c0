//! Binary entry point for the Cumulus CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cumulus::{
    CloudStart, ClusterConfig, ClusterError, ClusterManager, ClusterHandle, HarnessConfig,
    HttpTransport, LocalNodeLauncher, NodeLauncher, PatternScanner, SandboxMonitor,
    SshNodeLauncher,
};

mod cli;

use cli::{Cli, DownCommand, StatusCommand, UpCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Up(command) => up_command(command).await,
        Cli::Status(command) => status_command(command).await,
        Cli::Down(command) => down_command(command).await,
    }
}

fn load_manager() -> Result<(HarnessConfig, ClusterManager<HttpTransport>), CliError> {
    let config =
        HarnessConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let scanner = PatternScanner::new().map_err(|err| CliError::Sandbox(err.to_string()))?;
    let monitor = Arc::new(SandboxMonitor::new(
        config.resolved_log_dir(),
        config.resolved_test_name(),
        config.sandbox_ignore_errors,
        Arc::new(scanner),
    ));
    Ok((config, ClusterManager::over_http(monitor)))
}

async fn up_command(args: UpCommand) -> Result<i32, CliError> {
    let (mut config, manager) = load_manager()?;
    if let Some(nodes) = args.nodes {
        config.node_count = nodes;
    }
    if let Some(cloud_name) = args.cloud_name {
        config.cloud_name = Some(cloud_name);
    }

    let cluster_config = ClusterConfig::from_harness(&config)?;
    let launcher: Box<dyn NodeLauncher> = if cluster_config.hosts.is_empty() {
        Box::new(LocalNodeLauncher)
    } else {
        Box::new(SshNodeLauncher)
    };

    let mut handle = manager
        .build_cluster(&cluster_config, launcher.as_ref())
        .await?;

    let descriptor_path = Utf8Path::new(&args.descriptor);
    let provenance = CloudStart::capture(&cluster_config.test_name, None);
    manager.write_descriptor(descriptor_path, &handle, provenance)?;
    print_summary(&handle, descriptor_path)?;

    info!("cloud is up; waiting for Ctrl-C");
    if let Err(err) = tokio::signal::ctrl_c().await {
        report_error(&CliError::Config(err.to_string()));
    }

    manager.teardown(&mut handle, false).await?;
    Ok(0)
}

async fn status_command(args: StatusCommand) -> Result<i32, CliError> {
    let (_config, manager) = load_manager()?;
    let handle = manager.attach(Utf8Path::new(&args.descriptor))?;
    let expected_name = handle.cloud_name().to_owned();
    let report = manager
        .verify_cluster_healthy(&handle, Some(&expected_name), false)
        .await?;

    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "cloud '{expected_name}': {} nodes, sizes {:?}, consensus {:?}",
        report.expected, report.sizes, report.consensus
    )
    .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(0)
}

async fn down_command(args: DownCommand) -> Result<i32, CliError> {
    let (_config, manager) = load_manager()?;
    let mut handle = manager.attach(Utf8Path::new(&args.descriptor))?;
    manager.teardown(&mut handle, args.ignore_errors).await?;
    Ok(0)
}

fn print_summary(handle: &ClusterHandle, descriptor: &Utf8Path) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "built cloud '{}' with {} nodes; descriptor written to {descriptor}",
        handle.cloud_name(),
        handle.len()
    )
    .map_err(|err| CliError::Config(err.to_string()))
}

fn report_error(err: &CliError) {
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "cumulus: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  caused by: {cause}");
        source = cause.source();
    }
}
