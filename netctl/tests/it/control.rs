use axum::http::StatusCode;
use netctl::store::{ContainerEvent, ContainerRecord, ContainerState};
use netctl_tc::{Param, Resolve};
use serde_json::json;

use crate::helpers::{Harness, Namespaces};

fn request(node_id: &str, control: &str) -> String {
    json!({ "AppID": "scope", "NodeID": node_id, "Control": control }).to_string()
}

#[tokio::test]
async fn fast_then_packet_drop_then_clear() {
    let harness = Harness::new();
    harness.store.upsert(ContainerRecord::new("abc123", 4242, ContainerState::Running));
    let namespace = Namespaces.resolve(4242).unwrap();

    let (status, body) =
        harness.control(request("abc123;<container>", "network-control-table-fast")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
    assert_eq!(harness.cache.read(&namespace).latency, Param::new("500ms"));

    let (status, body) =
        harness.control(request("abc123;<container>", "network-control-table-pkt-drop-low")).await;
    assert_eq!((status, body), (StatusCode::OK, json!({})));

    let state = harness.cache.read(&namespace);
    assert_eq!(state.latency, Param::new("500ms"));
    assert_eq!(state.packet_loss, Param::new("10%"));

    let commands: Vec<_> = harness.recorder.commands.lock().iter().map(|(_, c)| c.clone()).collect();
    assert_eq!(
        commands,
        [
            "tc qdisc replace dev eth0 root handle 1: netem",
            "tc qdisc change dev eth0 root handle 1: netem delay 500ms",
            "tc qdisc replace dev eth0 root handle 1: netem",
            "tc qdisc change dev eth0 root handle 1: netem loss 10% delay 500ms",
        ]
    );

    let (status, _) = harness.control(request("abc123;<container>", "network-control-table-clear")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(harness.cache.get(&namespace).is_none());
}

#[tokio::test]
async fn unknown_container_is_reported_in_body() {
    let harness = Harness::new();

    let (status, body) =
        harness.control(request("unknown;<container>", "network-control-table-slow")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "error": "container unknown not found" }));
    assert!(harness.recorder.commands.lock().is_empty());
}

#[tokio::test]
async fn unknown_control_is_reported_in_body() {
    let harness = Harness::new();
    harness.store.upsert(ContainerRecord::new("abc123", 4242, ContainerState::Running));

    let (status, body) = harness.control(request("abc123;<container>", "network-control-table-turbo")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].as_str().unwrap().contains("network-control-table-turbo"));
}

#[tokio::test]
async fn stopped_container_rejects_controls() {
    let harness = Harness::new();
    harness.store.apply(ContainerEvent::Started { id: "abc123".into(), name: None, pid: 4242 });
    harness.store.apply(ContainerEvent::Stopped { id: "abc123".into() });

    let (status, body) = harness.control(request("abc123;<container>", "network-control-table-slow")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "error": "container abc123 is not running" }));
}

#[tokio::test]
async fn vanished_namespace_leaves_cache_untouched() {
    let harness = Harness::new();
    harness.store.upsert(ContainerRecord::new("gone", 12_345, ContainerState::Running));

    let (status, body) = harness.control(request("gone;<container>", "network-control-table-medium")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].as_str().unwrap().contains("12345"));
    assert!(harness.cache.is_empty());
}

#[tokio::test]
async fn node_id_without_suffix_is_bad_request() {
    let harness = Harness::new();

    let (status, body) = harness.control(request("abc123", "network-control-table-slow")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let harness = Harness::new();

    let (status, body) = harness.control("{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = harness.control(r#"{"NodeID":"abc123;<container>"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn destroyed_container_is_forgotten() {
    let harness = Harness::new();
    harness.store.apply(ContainerEvent::Started { id: "abc123".into(), name: None, pid: 4242 });
    harness.store.apply(ContainerEvent::Destroyed { id: "abc123".into() });

    let (status, body) = harness.control(request("abc123;<container>", "network-control-table-slow")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "error": "container abc123 not found" }));
    assert!(harness.store.is_empty());
}
