//! Unit tests for harness configuration resolution.

use rstest::rstest;

use crate::test_support::EnvGuard;

use super::*;

fn base_config() -> HarnessConfig {
    HarnessConfig {
        base_port: 54_321,
        port_offset: None,
        node_count: 1,
        cloud_name: None,
        log_dir: String::from("sandbox"),
        worker_bin: Some(String::from("/opt/worker")),
        worker_args: None,
        hosts: None,
        formation_timeout_secs: 30,
        retry_delay_ms: 1_000,
        shuffle: true,
        conservative: false,
        ignore_health: false,
        sandbox_ignore_errors: false,
        test_name: None,
    }
}

#[rstest]
fn base_port_defaults_pass_validation() {
    assert_eq!(base_config().effective_base_port().expect("valid"), 54_321);
}

#[rstest]
#[case(54_320)]
#[case(55_000)]
fn base_port_outside_range_is_rejected(#[case] port: u16) {
    let mut config = base_config();
    config.base_port = port;
    let err = config.effective_base_port().expect_err("out of range");
    assert!(matches!(
        err,
        ConfigError::OutOfRange {
            field: "base_port",
            ..
        }
    ));
}

#[rstest]
#[case(7)]
#[case(501)]
fn port_offset_outside_range_is_rejected(#[case] offset: u16) {
    let mut config = base_config();
    config.port_offset = Some(offset);
    let err = config.effective_base_port().expect_err("out of range");
    assert!(matches!(
        err,
        ConfigError::OutOfRange {
            field: "port_offset",
            ..
        }
    ));
}

#[rstest]
#[case(8, 54_329)]
#[case(500, 54_821)]
fn port_offset_shifts_the_base(#[case] offset: u16, #[case] expected: u16) {
    let mut config = base_config();
    config.port_offset = Some(offset);
    assert_eq!(config.effective_base_port().expect("valid"), expected);
}

#[rstest]
fn cloud_name_is_generated_when_absent() {
    let config = base_config();
    let first = config.resolved_cloud_name();
    let second = config.resolved_cloud_name();
    assert!(first.starts_with("cumulus-"));
    // Fresh suffix per resolution, so parallel builds cannot collide.
    assert_ne!(first, second);
}

#[rstest]
fn configured_cloud_name_wins() {
    let mut config = base_config();
    config.cloud_name = Some(String::from("pinned-cloud"));
    assert_eq!(config.resolved_cloud_name(), "pinned-cloud");
}

#[rstest]
fn missing_worker_bin_names_the_field() {
    let mut config = base_config();
    config.worker_bin = None;
    let err = config.resolved_worker_bin().expect_err("missing binary");
    assert!(err.to_string().contains("CUMULUS_WORKER_BIN"));
}

#[rstest]
fn formation_budget_uses_configured_knobs() {
    let mut config = base_config();
    config.formation_timeout_secs = 14;
    config.retry_delay_ms = 250;
    let budget = config.formation_budget();
    assert_eq!(budget.timeout, Duration::from_secs(14));
    assert_eq!(budget.retry_delay, Duration::from_millis(250));
}

#[tokio::test]
async fn environment_overrides_are_merged() {
    let _guard = EnvGuard::set_vars(&[
        ("CUMULUS_BASE_PORT", "54333"),
        ("CUMULUS_NODE_COUNT", "4"),
    ])
    .await;

    let config = HarnessConfig::load_without_cli_args().expect("config loads");
    assert_eq!(config.base_port, 54_333);
    assert_eq!(config.node_count, 4);
}
