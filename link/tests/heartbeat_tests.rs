//! Liveness monitor of streamed queries, on the paused tokio clock.

mod common;

use common::{number_page, MockTransport, Reply, NODE};
use quarry_link::{
    ConnectionOptions, QuarryLinkClient, QuarryLinkError, QuarryLinkTimeouts, RetryConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const FINAL: &str = "/v1/query/q1/final";
const HEARTBEAT: &str = "/v1/session/heartbeat";

fn scripted(version: Reply) -> Arc<MockTransport> {
    let transport = MockTransport::new();
    transport
        .on("POST", "/v1/query", Reply::ok(number_page("q1", &[0], Some("/page2"), Some(FINAL))))
        .on("GET", "/page2", Reply::ok(number_page("q1", &[1], Some(FINAL), Some(FINAL))))
        .on("GET", FINAL, Reply::ok(json!({})))
        .on("GET", "/v1/version", version);
    transport
}

fn heartbeat_client(transport: Arc<MockTransport>) -> QuarryLinkClient {
    QuarryLinkClient::builder()
        .base_url(NODE)
        .connection_options(ConnectionOptions::new().with_heartbeat(true))
        .timeouts(QuarryLinkTimeouts::builder().heartbeat_interval_secs(1).build())
        .transport(transport)
        .build()
        .unwrap()
}

fn nightly() -> Reply {
    Reply::ok(json!({"version": "v1.2.709-nightly"}))
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_ticks_until_close() {
    let transport = scripted(nightly());
    transport.on("POST", HEARTBEAT, Reply::ok(json!({"queries_to_remove": []})));
    let client = heartbeat_client(transport.clone());

    let mut stream = client.query_rows("select 1").await.unwrap();
    assert!(stream.liveness().is_some());
    assert!(stream.liveness().unwrap().last_contact().is_none());

    // a slow consumer: rows are read long after they arrived
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(transport.count("POST", HEARTBEAT), 3);
    assert_eq!(stream.collect_rows().await.unwrap().len(), 2);

    let beat = &transport.calls("POST", HEARTBEAT)[0];
    assert_eq!(beat.json(), json!({"node_to_queries": {"n1": ["q1"]}}));
    assert_eq!(beat.header("Content-Type"), Some("application/json"));
    assert!(stream.liveness().unwrap().last_contact().is_some());

    stream.close().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.count("POST", HEARTBEAT), 3, "no heartbeat after close");
    assert_eq!(transport.count("GET", FINAL), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_is_not_fatal() {
    let transport = scripted(nightly());
    transport
        .on("POST", HEARTBEAT, Reply::status(503))
        .on("POST", HEARTBEAT, Reply::NetworkError("reset".into()))
        .on("POST", HEARTBEAT, Reply::ok(json!({})));
    let client = heartbeat_client(transport.clone());

    let stream = client.query_rows("select 1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(transport.count("POST", HEARTBEAT), 3);
    let monitor = stream.liveness().unwrap();
    assert!(monitor.is_running());
    assert!(monitor.last_contact().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_removed_query_stops_monitor() {
    let transport = scripted(nightly());
    transport.on("POST", HEARTBEAT, Reply::ok(json!({"queries_to_remove": ["q1"]})));
    let client = heartbeat_client(transport.clone());

    let stream = client.query_rows("select 1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.count("POST", HEARTBEAT), 1);
    assert!(!stream.liveness().unwrap().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeat_without_server_support() {
    for version in [
        Reply::status(404),
        Reply::ok(json!({"version": "v1.2.600"})),
    ] {
        let transport = scripted(version);
        let client = heartbeat_client(transport.clone());

        let stream = client.query_rows("select 1").await.unwrap();
        assert!(stream.liveness().is_none());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.count("POST", HEARTBEAT), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_capability_probe_is_cached_per_node() {
    let transport = scripted(nightly());
    transport.on("POST", HEARTBEAT, Reply::ok(json!({})));
    let client = heartbeat_client(transport.clone());

    let first = client.query_rows("select 1").await.unwrap();
    let second = client.query_rows("select 2").await.unwrap();
    assert!(first.liveness().is_some());
    assert!(second.liveness().is_some());
    assert_eq!(transport.count("GET", "/v1/version"), 1);

    let node = reqwest::Url::parse(NODE).unwrap();
    assert!(client.supports_heartbeat(&node).await);
    assert_eq!(transport.count("GET", "/v1/version"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_close_stops_heartbeat() {
    let transport = scripted(nightly());
    transport.on("POST", HEARTBEAT, Reply::ok(json!({})));
    let client = heartbeat_client(transport.clone());

    let stream = client.query_rows("select 1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.count("POST", HEARTBEAT), 1);

    client.close();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(transport.count("POST", HEARTBEAT), 1);
    assert!(!stream.liveness().unwrap().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_failed_page_fetch_stops_heartbeat() {
    let transport = MockTransport::new();
    transport
        .on("POST", "/v1/query", Reply::ok(number_page("q1", &[0], Some("/page2"), Some(FINAL))))
        .on("GET", "/page2", Reply::NetworkError("connection reset".into()))
        .on("GET", FINAL, Reply::ok(json!({})))
        .on("GET", "/v1/version", nightly())
        .on("POST", HEARTBEAT, Reply::ok(json!({})));
    let client = QuarryLinkClient::builder()
        .base_url(NODE)
        .connection_options(ConnectionOptions::new().with_heartbeat(true))
        .timeouts(QuarryLinkTimeouts::builder().heartbeat_interval_secs(1).build())
        .retry_config(RetryConfig::default().with_max_attempts(2).with_initial_interval_ms(3000))
        .transport(transport.clone())
        .build()
        .unwrap();

    let mut stream = client.query_rows("select 1").await.unwrap();
    assert!(stream.next_row().await.unwrap().is_ok());
    let err = stream.next_row().await.unwrap().unwrap_err();
    assert!(matches!(err, QuarryLinkError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(transport.count("GET", FINAL), 1, "released after the failure");

    let beats = transport.count("POST", HEARTBEAT);
    assert!((2..=3).contains(&beats), "ticks while the fetch was retrying: {}", beats);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.count("POST", HEARTBEAT), beats);
    assert!(!stream.liveness().unwrap().is_running());
}
