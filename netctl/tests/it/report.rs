use axum::http::StatusCode;
use netctl::store::{ContainerEvent, ContainerRecord, ContainerState};
use serde_json::json;

use crate::helpers::Harness;

#[tokio::test]
async fn reports_live_and_dead_containers_only() {
    let harness = Harness::new();
    harness.store.apply(ContainerEvent::Created { id: "fresh".into(), name: None });
    harness.store.upsert(ContainerRecord::new("abc123", 4242, ContainerState::Running));
    harness.store.apply(ContainerEvent::Started { id: "old".into(), name: None, pid: 7 });
    harness.store.apply(ContainerEvent::Stopped { id: "old".into() });
    harness.store.apply(ContainerEvent::Started { id: "removed".into(), name: None, pid: 8 });
    harness.store.apply(ContainerEvent::Destroyed { id: "removed".into() });

    let (status, report) = harness.report().await;
    assert_eq!(status, StatusCode::OK);

    let nodes = report["Container"]["nodes"].as_object().unwrap();
    let mut ids: Vec<_> = nodes.keys().cloned().collect();
    ids.sort();
    assert_eq!(ids, ["abc123;<container>", "old;<container>"]);

    let live = &nodes["abc123;<container>"]["latestControls"];
    assert_eq!(live["network-control-table-slow"]["value"], json!({ "dead": false }));
    let dead = &nodes["old;<container>"]["latestControls"];
    assert_eq!(dead.as_object().unwrap().len(), 5);
    assert!(dead.as_object().unwrap().values().all(|entry| entry["value"]["dead"] == json!(true)));
}

#[tokio::test]
async fn report_reflects_applied_controls() {
    let harness = Harness::new();
    harness.store.upsert(ContainerRecord::new("abc123", 4242, ContainerState::Running));

    let body = json!({ "NodeID": "abc123;<container>", "Control": "network-control-table-slow" });
    let (status, _) = harness.control(body.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let (_, report) = harness.report().await;
    let latest = &report["Container"]["nodes"]["abc123;<container>"]["latest"];
    assert_eq!(latest["network-control-table-latency"]["value"], "2000ms");
    assert_eq!(latest["network-control-table-pktloss"]["value"], "-");

    let timestamp = &latest["network-control-table-latency"]["timestamp"];
    let controls = report["Container"]["nodes"]["abc123;<container>"]["latestControls"].as_object().unwrap();
    assert!(controls.values().all(|entry| &entry["timestamp"] == timestamp));
}

#[tokio::test]
async fn report_advertises_plugin_and_controls() {
    let harness = Harness::new();

    let (status, report) = harness.report().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["Container"]["nodes"], json!({}));
    assert_eq!(
        report["Container"]["controls"]["network-control-table-pkt-drop-low"],
        json!({
            "id": "network-control-table-pkt-drop-low",
            "human": "Packet drop: low",
            "icon": "fa-cut",
            "rank": 23
        })
    );
    assert_eq!(report["Container"]["table_templates"]["network-control-table"]["prefix"], "network-control-table-");
    assert_eq!(
        report["Plugins"],
        json!([{
            "id": "network-control",
            "label": "Network control",
            "description": "Adds Network controls to the running Docker containers",
            "interfaces": ["reporter", "controller"],
            "api_version": "1"
        }])
    );
}
