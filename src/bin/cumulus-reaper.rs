//! Zombie-node reaper.
//!
//! Stale worker processes left behind by crashed test runs keep answering on
//! the harness port range and join later clouds that reuse their name,
//! inflating observed membership. This sweeper probes the range and sends a
//! best-effort shutdown to every node that answers.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cumulus::peers::PORTS_PER_NODE;
use cumulus::{ControlClient, Endpoint};

/// Probe timeout per port; anything alive on localhost answers well within
/// this.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    name = "cumulus-reaper",
    about = "Sweep a port range with shutdown requests to clear zombie nodes"
)]
struct ReaperCli {
    /// Host to sweep.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// First port of the range.
    #[arg(long, default_value_t = 54_321)]
    base_port: u16,
    /// Number of node slots to sweep (two ports apart).
    #[arg(long, default_value_t = 8)]
    slots: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = ReaperCli::parse();
    let client = ControlClient::over_http();
    let mut swept: usize = 0;

    for slot in 0..cli.slots {
        let Some(port) = slot
            .checked_mul(PORTS_PER_NODE)
            .and_then(|step| cli.base_port.checked_add(step))
        else {
            break;
        };
        let endpoint = Endpoint::new(cli.host.clone(), port);
        match client.cloud_status(&endpoint, PROBE_TIMEOUT, true).await {
            Ok(status) => {
                info!(
                    %endpoint,
                    cloud_name = %status.cloud_name,
                    cloud_size = status.cloud_size,
                    "node answering; sending shutdown"
                );
                client.shutdown(&endpoint).await;
                swept += 1;
            }
            Err(_) => {
                // Nothing listening there; that is the desired state.
            }
        }
    }

    let mut stdout = io::stdout();
    if writeln!(
        stdout,
        "swept {swept} node(s) across {} port slot(s) on {}",
        cli.slots, cli.host
    )
    .is_err()
    {
        process::exit(1);
    }
}
