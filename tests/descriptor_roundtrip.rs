//! Round-trip behaviour for cluster descriptors: a handle serialized to a
//! descriptor and reconstructed through the manager yields nodes with the
//! same endpoints, ordinals, and cloud name.

use std::sync::Arc;

use camino::Utf8PathBuf;
use cumulus::control::ControlClient;
use cumulus::sandbox::SandboxMonitor;
use cumulus::test_support::{CountingScanner, ScriptedNode, ScriptedTransport};
use cumulus::{
    CloudStart, ClusterHandle, ClusterManager, DESCRIPTOR_FILE_NAME, Endpoint, NodeHandle,
};
use tempfile::TempDir;

fn scripted_manager() -> ClusterManager<ScriptedTransport> {
    let client = ControlClient::new(Arc::new(ScriptedTransport::new()));
    let monitor = Arc::new(SandboxMonitor::new(
        "sandbox",
        "descriptor-roundtrip",
        false,
        Arc::new(CountingScanner::new(false)),
    ));
    ClusterManager::new(client, monitor)
}

fn live_handle() -> ClusterHandle {
    let nodes: Vec<Box<dyn NodeHandle>> = (0..3)
        .map(|index| {
            let port = 54_321 + u16::try_from(index * 2).unwrap_or(0);
            Box::new(ScriptedNode::new(
                index,
                Endpoint::new("10.1.2.3", port),
                "roundtrip-cloud",
            )) as Box<dyn NodeHandle>
        })
        .collect();
    ClusterHandle::new(nodes, "roundtrip-cloud")
}

#[tokio::test]
async fn descriptor_round_trip_preserves_node_identity() {
    let dir = TempDir::new().expect("create dir");
    let path = Utf8PathBuf::from(dir.path().display().to_string()).join(DESCRIPTOR_FILE_NAME);

    let manager = scripted_manager();
    let original = live_handle();
    manager
        .write_descriptor(
            &path,
            &original,
            CloudStart::capture("descriptor-roundtrip", None),
        )
        .expect("descriptor writes");

    let attached = manager.attach(&path).expect("descriptor loads");

    assert_eq!(attached.len(), original.len());
    assert_eq!(attached.cloud_name(), original.cloud_name());
    for (restored, expected) in attached.nodes().iter().zip(original.nodes()) {
        assert_eq!(restored.node_id(), expected.node_id());
        assert_eq!(restored.endpoint(), expected.endpoint());
        assert_eq!(restored.cloud_name(), expected.cloud_name());
    }
}

#[tokio::test]
async fn descriptor_round_trip_survives_a_second_generation() {
    let dir = TempDir::new().expect("create dir");
    let first_path = Utf8PathBuf::from(dir.path().display().to_string()).join("first.json");
    let second_path = Utf8PathBuf::from(dir.path().display().to_string()).join("second.json");

    let manager = scripted_manager();
    let original = live_handle();
    manager
        .write_descriptor(
            &first_path,
            &original,
            CloudStart::capture("descriptor-roundtrip", None),
        )
        .expect("first descriptor writes");

    // Attach, re-serialize the attached handle, and attach again: cloned
    // nodes must describe themselves exactly as the originals did.
    let attached = manager.attach(&first_path).expect("first attach");
    manager
        .write_descriptor(
            &second_path,
            &attached,
            CloudStart::capture("descriptor-roundtrip", None),
        )
        .expect("second descriptor writes");
    let reattached = manager.attach(&second_path).expect("second attach");

    assert_eq!(reattached.states(), original.states());
}
