//! Retry policy behaviour on the paused tokio clock.

mod common;

use common::{builder, MockTransport, Reply, NODE};
use quarry_link::{
    HttpRequest, QuarryLinkError, RetryConfig, RetryOptions, RetryPolicy,
};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn request(path: &str) -> HttpRequest {
    HttpRequest::get(reqwest::Url::parse(NODE).unwrap().join(path).unwrap())
}

fn assert_within(actual: Duration, expected: Duration) {
    let low = expected.mul_f64(0.7);
    let slack = Duration::from_millis(1);
    assert!(
        actual + slack >= low && actual <= expected + slack,
        "delay {:?} outside [{:?}, {:?}]",
        actual,
        low,
        expected
    );
}

#[tokio::test(start_paused = true)]
async fn test_four_server_errors_then_success() {
    let transport = MockTransport::new();
    for _ in 0..4 {
        transport.on("GET", "/v1/query/q/page/1", Reply::status(503));
    }
    transport.on("GET", "/v1/query/q/page/1", Reply::ok(json!({"id": "q"})));

    let policy = RetryPolicy::new(RetryConfig::default());
    let response = policy
        .send(
            transport.as_ref(),
            &request("/v1/query/q/page/1"),
            RetryOptions::QUERY,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let calls = transport.requests();
    assert_eq!(calls.len(), 5, "succeeds on exactly the fifth attempt");

    // 1s, 4s, 16s, then 64s capped at 30s
    let expected = [1, 4, 16, 30].map(Duration::from_secs);
    for (i, window) in calls.windows(2).enumerate() {
        assert_within(window[1].at - window[0].at, expected[i]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_reports_attempts_and_last_status() {
    let transport = MockTransport::new();
    transport.on("GET", "/busy", Reply::status(502));

    let policy = RetryPolicy::new(RetryConfig::default().with_max_attempts(3));
    let err = policy
        .send(
            transport.as_ref(),
            &request("/busy"),
            RetryOptions::QUERY,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        QuarryLinkError::RetriesExhausted {
            attempts,
            last_status,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, Some(502));
        },
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_codes_and_network_errors_are_retried() {
    let transport = MockTransport::new();
    transport
        .on("GET", "/flaky", Reply::NetworkError("connection refused".into()))
        .on(
            "GET",
            "/flaky",
            Reply::Json(503, json!({"error": {"code": 3901, "message": "warehouse starting"}})),
        )
        .on("GET", "/flaky", Reply::ok(json!({})));

    let policy = RetryPolicy::default();
    let response = policy
        .send(
            transport.as_ref(),
            &request("/flaky"),
            RetryOptions::QUERY,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_backoff() {
    let transport = MockTransport::new();
    transport.on("GET", "/down", Reply::status(503));
    let cancel = CancellationToken::new();

    let task = {
        let transport = transport.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            RetryPolicy::default()
                .send(transport.as_ref(), &request("/down"), RetryOptions::QUERY, &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    let cancelled_at = tokio::time::Instant::now();
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(QuarryLinkError::Cancelled)));
    assert_eq!(transport.request_count(), 1, "no attempt after cancellation");
    assert!(tokio::time::Instant::now() - cancelled_at < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_submission_retries_server_errors() {
    let transport = MockTransport::new();
    transport
        .on("POST", "/v1/query", Reply::status(500))
        .on("POST", "/v1/query", Reply::ok(json!({"id": "q1", "state": "Succeeded"})));
    let client = builder(transport.clone()).build().unwrap();

    let query = client.submit("select 1").await.unwrap();
    assert_eq!(query.query_id(), "q1");

    let calls = transport.calls("POST", "/v1/query");
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].header("X-QUERY-ID"),
        calls[1].header("X-QUERY-ID"),
        "retried submission keeps its query id"
    );
}

#[tokio::test(start_paused = true)]
async fn test_submission_exhaustion_is_submission_failure() {
    let transport = MockTransport::new();
    transport.on("POST", "/v1/query", Reply::NetworkError("connection refused".into()));
    let client = builder(transport.clone())
        .retry_config(RetryConfig::default().with_max_attempts(2))
        .build()
        .unwrap();

    let err = client.submit("select 1").await.err().unwrap();
    match err {
        QuarryLinkError::SubmissionFailed(inner) => {
            assert!(matches!(*inner, QuarryLinkError::RetriesExhausted { attempts: 2, .. }));
        },
        other => panic!("expected SubmissionFailed, got {:?}", other),
    }
}
