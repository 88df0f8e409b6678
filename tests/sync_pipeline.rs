//! End-to-end neighbor sync against a mock A10 device
//!
//! Drives the startup path (fetch, full reconciliation) and then the event
//! loop from synthetic watcher events, asserting on the exact device calls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bgp_neighbor_sync::controller::node_source::node_events;
use bgp_neighbor_sync::controller::Reconciler;
use bgp_neighbor_sync::device::{A10Client, DeviceConfig, NeighborRegistry, RetryPolicy};
use bgp_neighbor_sync::Error;
use futures::stream;
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus};
use kube::api::ObjectMeta;
use kube::runtime::watcher;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NEIGHBOR_PATH: &str = "/axapi/v3/router/bgp/64512/neighbor/ipv4-neighbor";
const SELECTOR: &str = "bgp=cilium";

fn node(name: &str, ready: bool, cordoned: bool, external_ip: &str, labelled: bool) -> Node {
    let mut labels = BTreeMap::new();
    if labelled {
        labels.insert("bgp".to_string(), "cilium".to_string());
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable: Some(cordoned),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            addresses: Some(vec![NodeAddress {
                type_: "ExternalIP".to_string(),
                address: external_ip.to_string(),
            }]),
            ..Default::default()
        }),
    }
}

async fn start_device() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/axapi/v3/auth"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"authresponse": {"signature": "sig"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(NEIGHBOR_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ipv4-neighbor-list": [
                {"neighbor-ipv4": "1.2.3.4", "nbr-remote-as": 54321},
                {"neighbor-ipv4": "5.6.7.8", "nbr-remote-as": 54321},
                {"neighbor-ipv4": "7.7.7.7", "nbr-remote-as": 99}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    server
}

async fn expect_delete(server: &MockServer, address: &str) {
    Mock::given(method("DELETE"))
        .and(path(format!("{NEIGHBOR_PATH}/{address}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> Arc<A10Client> {
    Arc::new(
        A10Client::new(DeviceConfig {
            base_url: server.uri(),
            username: "admin".to_string(),
            password: "secret".to_string(),
            local_as: 64512,
            remote_as: 54321,
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::new(3, Duration::ZERO),
        })
        .unwrap(),
    )
}

#[tokio::test]
async fn startup_prunes_then_events_converge() {
    let server = start_device().await;
    expect_delete(&server, "5.6.7.8").await;
    expect_delete(&server, "1.2.3.4").await;
    expect_delete(&server, "9.9.9.9").await;
    Mock::given(method("POST"))
        .and(path(NEIGHBOR_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let device = client_for(&server);
    let reconciler = Reconciler::new(Arc::clone(&device), SELECTOR);

    // Startup: the foreign-AS neighbor is never mirrored, so never touched
    assert_eq!(
        device.fetch_neighbors().await.unwrap(),
        vec!["1.2.3.4", "5.6.7.8"]
    );
    let removed = reconciler
        .full_reconcile(&[node("n1", true, false, "1.2.3.4", true)])
        .await
        .unwrap();
    assert_eq!(removed, vec!["5.6.7.8"]);

    // Steady state
    let raw = stream::iter(vec![
        Ok::<_, String>(watcher::Event::Init),
        Ok(watcher::Event::InitApply(node("n1", true, false, "1.2.3.4", true))),
        Ok(watcher::Event::InitApply(node("n2", true, false, "9.9.9.9", true))),
        Ok(watcher::Event::InitApply(node("n3", true, false, "8.8.8.8", false))),
        Ok(watcher::Event::InitDone),
        Ok(watcher::Event::Apply(node("n1", true, true, "1.2.3.4", true))),
        Ok(watcher::Event::Delete(node("n2", true, false, "9.9.9.9", true))),
        Ok(watcher::Event::Delete(node("n3", true, false, "8.8.8.8", false))),
    ]);

    let result = reconciler
        .run(node_events(raw, None), std::future::pending::<()>())
        .await;

    assert!(matches!(result, Err(Error::WatchError(_))));
    assert!(device.neighbors().await.is_empty());
}

#[tokio::test]
async fn failed_correction_does_not_stop_the_loop() {
    let server = start_device().await;
    Mock::given(method("POST"))
        .and(path(NEIGHBOR_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    expect_delete(&server, "5.6.7.8").await;

    let device = client_for(&server);
    let reconciler = Reconciler::new(Arc::clone(&device), SELECTOR);
    device.fetch_neighbors().await.unwrap();

    let raw = stream::iter(vec![
        Ok::<_, String>(watcher::Event::Apply(node("n2", true, false, "9.9.9.9", true))),
        Ok(watcher::Event::Apply(node("n3", true, false, "5.6.7.8", true))),
        Ok(watcher::Event::Apply(node("n3", true, false, "5.6.7.8", false))),
    ]);
    let _ = reconciler
        .run(node_events(raw, None), std::future::pending::<()>())
        .await;

    assert!(!device.contains_neighbor("9.9.9.9").await);
    assert!(!device.contains_neighbor("5.6.7.8").await);
    assert!(device.contains_neighbor("1.2.3.4").await);
}
