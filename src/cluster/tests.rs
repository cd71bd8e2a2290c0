//! Unit tests for the cluster lifecycle manager and descriptors.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

use crate::config::HarnessConfig;
use crate::control::ControlClient;
use crate::node::NodeHandle;
use crate::sandbox::{LogScanner, SandboxMonitor};
use crate::stabilize::RetryBudget;
use crate::test_support::{
    CountingScanner, ScriptedLauncher, ScriptedNode, ScriptedTransport, status_body,
};

use super::*;

fn scripted_manager(
    found: bool,
) -> (
    ClusterManager<ScriptedTransport>,
    ScriptedTransport,
    Arc<CountingScanner>,
) {
    let transport = ScriptedTransport::new();
    let client = ControlClient::new(Arc::new(transport.clone()));
    let scanner = Arc::new(CountingScanner::new(found));
    let monitor = Arc::new(SandboxMonitor::new(
        "sandbox",
        "cluster-test",
        false,
        Arc::clone(&scanner) as Arc<dyn LogScanner>,
    ));
    (ClusterManager::new(client, monitor), transport, scanner)
}

fn build_config(log_dir: Utf8PathBuf, node_count: usize) -> ClusterConfig {
    ClusterConfig {
        node_count,
        base_port: 54_321,
        cloud_name: String::from("cloud-a"),
        log_dir,
        program: Utf8PathBuf::from("/opt/worker"),
        extra_args: Vec::new(),
        hosts: Vec::new(),
        budget: RetryBudget::new(Duration::from_secs(30), Duration::from_secs(1)),
        shuffle: false,
        conservative: false,
        ignore_health: false,
        test_name: String::from("cluster-test"),
    }
}

fn sandbox_dir() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("create sandbox dir");
    let path = Utf8PathBuf::from(dir.path().display().to_string());
    (dir, path)
}

fn sample_states(cloud_name: &str) -> Vec<NodeState> {
    vec![
        NodeState {
            node_id: 0,
            host: String::from("127.0.0.1"),
            port: 54_321,
            cloud_name: cloud_name.to_owned(),
        },
        NodeState {
            node_id: 1,
            host: String::from("127.0.0.1"),
            port: 54_323,
            cloud_name: cloud_name.to_owned(),
        },
    ]
}

fn sample_descriptor(cloud_name: &str) -> CloudDescriptor {
    CloudDescriptor {
        cloud_start: CloudStart::capture("cluster-test", None),
        cloud_nodes: sample_states(cloud_name),
    }
}

fn scripted_handle(cloud_name: &str, failing: bool) -> ClusterHandle {
    let first = ScriptedNode::new(0, crate::control::Endpoint::new("127.0.0.1", 54_321), cloud_name);
    let mut second =
        ScriptedNode::new(1, crate::control::Endpoint::new("127.0.0.1", 54_323), cloud_name);
    if failing {
        second = second.failing_terminate();
    }
    let nodes: Vec<Box<dyn NodeHandle>> = vec![Box::new(first), Box::new(second)];
    ClusterHandle::new(nodes, cloud_name)
}

#[tokio::test(start_paused = true)]
async fn build_cluster_launches_forms_and_reports() {
    let (_dir, log_dir) = sandbox_dir();
    let (manager, transport, _scanner) = scripted_manager(false);
    let launcher = ScriptedLauncher::new();
    let config = build_config(log_dir.clone(), 2);

    // Connection wait, anchor consensus, one verify per node, log marker.
    transport.push_json(status_body(1, false, "cloud-a", "node-1"));
    transport.push_json(status_body(2, true, "cloud-a", "node-1"));
    transport.push_json(status_body(2, true, "cloud-a", "node-0"));
    transport.push_json(status_body(2, true, "cloud-a", "node-1"));
    transport.push_json(json!({}));

    let handle = manager
        .build_cluster(&config, &launcher)
        .await
        .expect("cluster builds");

    assert_eq!(handle.len(), 2);
    assert_eq!(handle.cloud_name(), "cloud-a");
    assert_eq!(transport.request_count(), 5);

    let plans = launcher.plans();
    assert_eq!(plans.len(), 2);
    let ports: Vec<u16> = plans.iter().map(|p| p.endpoint.port).collect();
    assert_eq!(ports, vec![54_321, 54_323]);
    assert!(plans.iter().all(|p| p.peer_file.is_some()));

    let peer_file = log_dir.join(PEER_FILE_NAME);
    let written = std::fs::read_to_string(&peer_file).expect("peer file written");
    assert_eq!(written, "127.0.0.1:54321\n127.0.0.1:54323\n");
}

#[tokio::test(start_paused = true)]
async fn build_cluster_cleans_up_after_launch_failure() {
    let (_dir, log_dir) = sandbox_dir();
    let (manager, transport, scanner) = scripted_manager(false);
    let launcher = ScriptedLauncher::new().failing_at(1);
    let config = build_config(log_dir, 2);

    let err = manager
        .build_cluster(&config, &launcher)
        .await
        .expect_err("second launch fails");

    assert!(matches!(err, ClusterError::Node(_)));
    // The already-launched node was terminated and the sandbox checked.
    assert_eq!(launcher.termination_count(), 1);
    assert_eq!(scanner.scan_count(), 1);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn build_cluster_cleans_up_after_formation_failure() {
    let (_dir, log_dir) = sandbox_dir();
    let (manager, transport, scanner) = scripted_manager(false);
    let launcher = ScriptedLauncher::new();
    let config = build_config(log_dir, 2);

    transport.push_json(status_body(1, false, "cloud-a", "node-1"));
    // Zombie: three members seen while only two were launched.
    transport.push_json(status_body(3, false, "cloud-a", "node-1"));

    let err = manager
        .build_cluster(&config, &launcher)
        .await
        .expect_err("zombie aborts the build");

    assert!(matches!(
        err,
        ClusterError::Formation(crate::formation::FormationError::ZombieMembership { .. })
    ));
    assert_eq!(launcher.termination_count(), 2);
    assert_eq!(scanner.scan_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_reconstructs_nodes_from_a_descriptor() {
    let (manager, transport, _scanner) = scripted_manager(false);
    let handle = manager.build_cluster_from_descriptor(&sample_descriptor("cloud-b"));

    assert_eq!(handle.len(), 2);
    assert_eq!(handle.cloud_name(), "cloud-b");
    let endpoints = handle.endpoints();
    assert_eq!(endpoints.first().map(|e| e.port), Some(54_321));
    assert_eq!(endpoints.get(1).map(|e| e.port), Some(54_323));

    // Cloned nodes probe liveness through the control plane.
    transport.push_json(status_body(2, true, "cloud-b", "node-0"));
    transport.push_json(status_body(2, true, "cloud-b", "node-1"));
    assert!(handle.touch().await.expect("touch succeeds"));

    // With nothing answering, the nodes read as dead rather than erroring.
    assert!(!handle.touch().await.expect("touch still succeeds"));
}

#[tokio::test(start_paused = true)]
async fn verify_cluster_healthy_delegates_to_formation() {
    let (manager, transport, _scanner) = scripted_manager(false);
    let handle = manager.build_cluster_from_descriptor(&sample_descriptor("cloud-b"));

    transport.push_json(status_body(2, true, "cloud-b", "node-0"));
    transport.push_json(status_body(2, true, "cloud-b", "node-1"));
    let report = manager
        .verify_cluster_healthy(&handle, Some("cloud-b"), false)
        .await
        .expect("healthy cloud verifies");
    assert_eq!(report.sizes, vec![2, 2]);
    assert_eq!(report.expected, 2);
}

#[tokio::test(start_paused = true)]
async fn teardown_never_raises_and_checks_logs_once() {
    let (manager, transport, scanner) = scripted_manager(false);
    // The shutdown broadcast fails (nothing scripted) and one node's
    // terminate fails; teardown must still run every step.
    let mut handle = scripted_handle("cloud-a", true);

    manager
        .teardown(&mut handle, false)
        .await
        .expect("teardown completes despite failures");

    assert!(handle.is_empty());
    assert_eq!(scanner.scan_count(), 1);
    let shutdowns = transport
        .requests()
        .iter()
        .filter(|request| request.url.contains("Shutdown.json"))
        .count();
    assert_eq!(shutdowns, 2);
}

#[tokio::test(start_paused = true)]
async fn teardown_surfaces_log_findings_exactly_once() {
    let (manager, _transport, scanner) = scripted_manager(true);

    let mut handle = scripted_handle("cloud-a", false);
    let err = manager
        .teardown(&mut handle, false)
        .await
        .expect_err("fresh findings surface");
    assert!(matches!(err, ClusterError::Sandbox(_)));

    // A second teardown (another hook racing on the same cluster state)
    // returns the cached report without scanning again.
    let mut second = scripted_handle("cloud-a", false);
    manager
        .teardown(&mut second, false)
        .await
        .expect("already-reported findings are suppressed");
    assert_eq!(scanner.scan_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_ignore_policy_suppresses_findings() {
    let (manager, _transport, scanner) = scripted_manager(true);
    let mut handle = scripted_handle("cloud-a", false);

    manager
        .teardown(&mut handle, true)
        .await
        .expect("ignored findings do not surface");
    assert_eq!(scanner.scan_count(), 1);
}

#[rstest]
fn descriptor_round_trips_through_parse() {
    let document = sample_descriptor("cloud-b");
    let text = serde_json::to_string_pretty(&document).expect("serialize");
    let back = parse_descriptor(&text).expect("parse");
    assert_eq!(back, document);
}

#[rstest]
#[case("time")]
#[case("cwd")]
#[case("test_name")]
#[case("command_line")]
#[case("config_path")]
#[case("username")]
#[case("ip")]
fn descriptor_names_the_missing_start_key(#[case] key: &str) {
    let mut document =
        serde_json::to_value(sample_descriptor("cloud-b")).expect("to value");
    document
        .get_mut("cloud_start")
        .and_then(serde_json::Value::as_object_mut)
        .expect("cloud_start object")
        .remove(key);

    let err = parse_descriptor(&document.to_string()).expect_err("missing key must fail");
    assert!(matches!(err, DescriptorError::MissingField { field } if field == key));
}

#[rstest]
fn descriptor_accepts_null_config_path() {
    let mut document =
        serde_json::to_value(sample_descriptor("cloud-b")).expect("to value");
    document["cloud_start"]["config_path"] = serde_json::Value::Null;
    parse_descriptor(&document.to_string()).expect("null config_path is fine");
}

#[rstest]
fn descriptor_requires_both_sections() {
    let err = parse_descriptor(r#"{ "cloud_nodes": [] }"#).expect_err("no cloud_start");
    assert!(matches!(
        err,
        DescriptorError::MissingSection {
            section: "cloud_start"
        }
    ));

    let start_only = json!({
        "cloud_start": serde_json::to_value(CloudStart::capture("t", None)).expect("value"),
    });
    let err = parse_descriptor(&start_only.to_string()).expect_err("no cloud_nodes");
    assert!(matches!(
        err,
        DescriptorError::MissingSection {
            section: "cloud_nodes"
        }
    ));
}

#[rstest]
fn descriptor_rejects_an_empty_node_list() {
    let mut document =
        serde_json::to_value(sample_descriptor("cloud-b")).expect("to value");
    document["cloud_nodes"] = json!([]);
    let err = parse_descriptor(&document.to_string()).expect_err("empty node list");
    assert!(matches!(err, DescriptorError::EmptyNodes));
}

#[rstest]
fn descriptor_rejects_unknown_node_fields() {
    let mut document =
        serde_json::to_value(sample_descriptor("cloud-b")).expect("to value");
    document["cloud_nodes"][0]["remote_jar"] = json!("/tmp/worker.jar");
    let err = parse_descriptor(&document.to_string()).expect_err("unknown node field");
    assert!(matches!(err, DescriptorError::Parse { .. }));
    assert!(err.to_string().contains("remote_jar"));
}

#[rstest]
fn descriptor_files_round_trip_on_disk() {
    let (_dir, path) = sandbox_dir();
    let file = path.join(DESCRIPTOR_FILE_NAME);
    let document = sample_descriptor("cloud-b");

    write_descriptor(&file, &document).expect("write descriptor");
    let back = load_descriptor(&file).expect("load descriptor");
    assert_eq!(back, document);
}

#[rstest]
fn cluster_config_resolves_remote_hosts() {
    let harness = HarnessConfig {
        base_port: 54_321,
        port_offset: None,
        node_count: 2,
        cloud_name: Some(String::from("cloud-a")),
        log_dir: String::from("sandbox"),
        worker_bin: Some(String::from("/opt/worker")),
        worker_args: Some(vec![String::from("--heap"), String::from("2g")]),
        hosts: Some(vec![String::from("ci@build-1"), String::from("build-2")]),
        formation_timeout_secs: 30,
        retry_delay_ms: 1_000,
        shuffle: true,
        conservative: false,
        ignore_health: false,
        sandbox_ignore_errors: false,
        test_name: Some(String::from("cluster-test")),
    };

    let config = ClusterConfig::from_harness(&harness).expect("config resolves");
    assert_eq!(config.hosts.len(), 2);
    let first = config.hosts.first().expect("first host");
    assert_eq!(first.host, "build-1");
    assert_eq!(first.user.as_deref(), Some("ci"));
    assert_eq!(config.cloud_name, "cloud-a");
    assert_eq!(config.extra_args, vec!["--heap", "2g"]);
}
