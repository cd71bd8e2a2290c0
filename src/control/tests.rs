//! Unit tests for the control-plane client.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;

use crate::test_support::{ScriptedTransport, status_body};

use super::*;

fn scripted_client() -> (ControlClient<ScriptedTransport>, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    let client = ControlClient::new(Arc::new(transport.clone()));
    (client, transport)
}

#[rstest]
#[case("CloudStatus.json", "http://10.0.0.1:54321/CloudStatus.json")]
#[case("/CloudStatus.json", "http://10.0.0.1:54321/CloudStatus.json")]
#[case("http://other:1/x", "http://other:1/x")]
fn url_for_handles_separators(#[case] location: &str, #[case] expected: &str) {
    let endpoint = Endpoint::new("10.0.0.1", 54_321);
    assert_eq!(endpoint.url_for(location), expected);
}

#[rstest]
#[case("error")]
#[case("Error")]
#[case("errors")]
#[case("Errors")]
fn truthy_error_keys_raise(#[case] key: &str) {
    let body = json!({ key: "it broke" });
    let err = scan_response_flags("http://n/x", &body, false)
        .expect_err("error key should raise");
    assert!(matches!(err, ControlError::Remote { key: k, .. } if k == key));
}

#[rstest]
#[case(json!(null))]
#[case(json!(false))]
#[case(json!(0))]
#[case(json!(""))]
#[case(json!([]))]
#[case(json!({}))]
fn falsy_error_values_pass(#[case] value: serde_json::Value) {
    let body = json!({ "error": value });
    scan_response_flags("http://n/x", &body, false).expect("falsy error should pass");
}

#[rstest]
fn ignored_remote_error_returns_body() {
    let body = json!({ "errors": ["bad"] });
    scan_response_flags("http://n/x", &body, true)
        .expect("ignored error should not raise");
}

#[rstest]
#[case("warning")]
#[case("Warnings")]
fn warnings_never_raise(#[case] key: &str) {
    let body = json!({ key: "watch out" });
    scan_response_flags("http://n/x", &body, false).expect("warnings are logged, not raised");
}

#[tokio::test]
async fn fetch_drops_absent_params() {
    let (client, transport) = scripted_client();
    transport.push_json(json!({ "ok": true }));

    let options = RequestOptions {
        params: vec![
            (String::from("source"), Some(String::from("k1"))),
            (String::from("destination"), None),
            (String::from("k"), Some(String::from("3"))),
        ],
        ..RequestOptions::default()
    };
    client
        .fetch(String::from("http://n:1/Op.json"), &options)
        .await
        .expect("scripted fetch");

    let requests = transport.requests();
    let request = requests.first().expect("one request");
    assert_eq!(
        request.params,
        vec![
            (String::from("source"), String::from("k1")),
            (String::from("k"), String::from("3")),
        ]
    );
}

#[tokio::test]
async fn fetch_raises_on_remote_error_field() {
    let (client, transport) = scripted_client();
    transport.push_json(json!({ "error": "boom" }));

    let err = client
        .fetch(
            String::from("http://n:1/Op.json"),
            &RequestOptions::default(),
        )
        .await
        .expect_err("remote error should raise");
    assert!(matches!(err, ControlError::Remote { .. }));
}

#[tokio::test]
async fn cloud_status_decodes_snapshot() {
    let (client, transport) = scripted_client();
    transport.push_json(status_body(2, true, "cloud-a", "node-0"));

    let endpoint = Endpoint::new("127.0.0.1", 54_321);
    let status = client
        .cloud_status(&endpoint, Duration::from_secs(5), false)
        .await
        .expect("status should decode");
    assert_eq!(status.cloud_size, 2);
    assert!(status.consensus);
    assert_eq!(status.cloud_name, "cloud-a");
    assert_eq!(status.nodes.len(), 2);
}

#[tokio::test]
async fn cloud_status_requires_member_list() {
    let (client, transport) = scripted_client();
    transport.push_json(json!({
        "cloud_size": 1,
        "consensus": true,
        "locked": false,
        "cloud_name": "cloud-a",
        "node_name": "node-0",
        "cloud_healthy": true,
    }));

    let endpoint = Endpoint::new("127.0.0.1", 54_321);
    let err = client
        .cloud_status(&endpoint, Duration::from_secs(5), false)
        .await
        .expect_err("missing member list should fail decoding");
    assert!(matches!(err, ControlError::Decode { .. }));
}

#[tokio::test]
async fn shutdown_swallows_failures() {
    let (client, transport) = scripted_client();
    transport.push_error(ControlError::Connection {
        url: String::from("http://n:1/Shutdown.json"),
        message: String::from("connection reset"),
    });

    let endpoint = Endpoint::new("127.0.0.1", 54_321);
    // Must not panic or propagate; shutdown is inherently racy.
    client.shutdown(&endpoint).await;
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn request_url_sends_concrete_params() {
    let (client, transport) = scripted_client();
    transport.push_json(json!({ "ok": true }));

    let params = vec![(String::from("job_key"), String::from("j-1"))];
    client
        .request_url(
            String::from("http://n:1/Progress.json"),
            &params,
            Duration::from_secs(5),
        )
        .await
        .expect("scripted request");

    let requests = transport.requests();
    let request = requests.first().expect("one request");
    assert_eq!(request.params, params);
    assert_eq!(request.url, "http://n:1/Progress.json");
}
