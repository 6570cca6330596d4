//! Node discovery through the client.

mod common;

use common::{builder, client, MockTransport, Reply};
use quarry_link::{ConnectionOptions, LoadBalancingPolicy, QuarryLinkError};
use serde_json::json;

const DISCOVERY: &str = "/v1/discovery_nodes";

#[tokio::test]
async fn test_discovery_unsupported_keeps_static_nodes() {
    let transport = MockTransport::new();
    transport.on("GET", DISCOVERY, Reply::Text(404, "not found".into()));
    let client = client(transport.clone());

    let err = client.discover().await.unwrap_err();
    assert!(matches!(err, QuarryLinkError::DiscoveryUnsupported));
    assert_eq!(transport.count("GET", DISCOVERY), 1, "404 is not retried");
    assert_eq!(client.nodes().len(), 1);
    assert_eq!(client.nodes()[0].host_str(), Some("node1"));
}

#[tokio::test]
async fn test_discovery_replaces_nodes() {
    let transport = MockTransport::new();
    transport
        .on(
            "GET",
            DISCOVERY,
            Reply::ok(json!([{"address": "10.0.0.1:8000"}, {"address": "10.0.0.2:8000"}])),
        )
        .on("POST", "/v1/query", Reply::ok(json!({"id": "q", "state": "Succeeded"})));
    let client = builder(transport.clone())
        .load_balancing_policy(LoadBalancingPolicy::RoundRobin)
        .build()
        .unwrap();

    let nodes = client.discover().await.unwrap();
    assert_eq!(nodes.len(), 2);
    let hosts: Vec<_> = client
        .nodes()
        .iter()
        .map(|url| url.host_str().unwrap().to_string())
        .collect();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2"]);

    client.submit("select 1").await.unwrap();
    client.submit("select 1").await.unwrap();
    let submitted: Vec<_> = transport
        .calls("POST", "/v1/query")
        .iter()
        .map(|r| r.host().to_string())
        .collect();
    assert_eq!(submitted, vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn test_discovery_error_body_is_hard_failure() {
    let transport = MockTransport::new();
    transport.on(
        "GET",
        DISCOVERY,
        Reply::ok(json!({"error": {"code": 1001, "message": "cluster not ready"}})),
    );
    let client = client(transport.clone());

    let err = client.discover().await.unwrap_err();
    assert_eq!(err.server_code(), Some(1001));
    assert_eq!(client.nodes().len(), 1);
}

#[tokio::test]
async fn test_auto_discovery_runs_once() {
    let transport = MockTransport::new();
    transport
        .on("GET", DISCOVERY, Reply::Text(404, "not found".into()))
        .on("POST", "/v1/query", Reply::ok(json!({"id": "q", "state": "Succeeded"})));
    let client = builder(transport.clone())
        .connection_options(
            ConnectionOptions::new()
                .with_heartbeat(false)
                .with_auto_discovery(true),
        )
        .build()
        .unwrap();

    for _ in 0..3 {
        client.submit("select 1").await.unwrap();
    }
    assert_eq!(transport.count("GET", DISCOVERY), 1);
    assert_eq!(transport.count("POST", "/v1/query"), 3);
    assert_eq!(transport.requests()[0].path(), DISCOVERY, "discovery precedes the first query");
}

#[tokio::test]
async fn test_auto_discovery_routes_to_discovered_nodes() {
    let transport = MockTransport::new();
    transport
        .on("GET", DISCOVERY, Reply::ok(json!([{"address": "10.0.0.9:8000"}])))
        .on("POST", "/v1/query", Reply::ok(json!({"id": "q", "state": "Succeeded"})));
    let client = builder(transport.clone())
        .connection_options(
            ConnectionOptions::new()
                .with_heartbeat(false)
                .with_auto_discovery(true),
        )
        .build()
        .unwrap();

    let query = client.submit("select 1").await.unwrap();
    assert_eq!(query.node().host_str(), Some("10.0.0.9"));
    assert_eq!(query.node().port(), Some(8000));
}
