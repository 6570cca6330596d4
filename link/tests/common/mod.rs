#![allow(dead_code)]
//! Scripted in-memory transport shared by the integration tests.
//!
//! Replies are queued per `METHOD /path` (host ignored). When a queue runs
//! dry its last reply is repeated; unknown routes answer 404. Hosts taken
//! down with `take_down` fail every request at connection level. Every request
//! is recorded with the tokio instant it arrived at, so paused-clock tests
//! can measure backoff delays.

use async_trait::async_trait;
use quarry_link::{
    ConnectionOptions, HttpRequest, HttpResponse, HttpTransport, QuarryLinkClient,
    QuarryLinkClientBuilder, QuarryLinkError,
};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub const NODE: &str = "http://node1:8000";

#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, JsonValue),
    Text(u16, String),
    WithHeaders(u16, JsonValue, Vec<(String, String)>),
    NetworkError(String),
}

impl Reply {
    pub fn ok(body: JsonValue) -> Self {
        Reply::Json(200, body)
    }

    pub fn status(status: u16) -> Self {
        Reply::Text(status, String::new())
    }

    fn into_result(self) -> quarry_link::Result<HttpResponse> {
        match self {
            Reply::Json(status, body) => Ok(HttpResponse::new(status, body.to_string())),
            Reply::Text(status, body) => Ok(HttpResponse::new(status, body)),
            Reply::WithHeaders(status, body, headers) => {
                let mut response = HttpResponse::new(status, body.to_string());
                for (name, value) in headers {
                    response.headers.insert(name.to_ascii_lowercase(), value);
                }
                Ok(response)
            },
            Reply::NetworkError(msg) => Err(QuarryLinkError::NetworkError(msg)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: reqwest::Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> JsonValue {
        serde_json::from_str(self.body.as_deref().unwrap_or("null")).unwrap()
    }
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    last: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    down: Mutex<HashSet<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `reply` for `method path`.
    pub fn on(&self, method: &str, path: &str, reply: Reply) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(format!("{} {}", method, path))
            .or_default()
            .push_back(reply);
        self
    }

    /// Make `host` unreachable from now on.
    pub fn take_down(&self, host: &str) -> &Self {
        self.down.lock().unwrap().insert(host.to_string());
        self
    }

    /// Hosts of the requests sent to `method path`, in order.
    pub fn hosts(&self, method: &str, path: &str) -> Vec<String> {
        self.calls(method, path)
            .iter()
            .map(|r| r.host().to_string())
            .collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests sent to `method path`.
    pub fn calls(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path() == path)
            .collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.calls(method, path).len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> quarry_link::Result<HttpResponse> {
        let key = format!("{} {}", request.method, request.url.path());
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.to_string(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });

        let host = request.url.host_str().unwrap_or_default();
        if self.down.lock().unwrap().contains(host) {
            return Err(QuarryLinkError::NetworkError(format!("{} unreachable", host)));
        }

        let queued = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let reply = match queued {
            Some(reply) => {
                self.last.lock().unwrap().insert(key, reply.clone());
                reply
            },
            None => match self.last.lock().unwrap().get(&key) {
                Some(reply) => reply.clone(),
                None => Reply::Text(404, "not found".to_string()),
            },
        };
        reply.into_result()
    }
}

/// One result page with a single `number UInt64` column.
pub fn number_page(
    id: &str,
    numbers: &[u64],
    next_uri: Option<&str>,
    final_uri: Option<&str>,
) -> JsonValue {
    json!({
        "id": id,
        "node_id": "n1",
        "schema": [{"name": "number", "type": "UInt64"}],
        "data": numbers.iter().map(|n| vec![n.to_string()]).collect::<Vec<_>>(),
        "state": if next_uri.is_some() && next_uri != final_uri { "Running" } else { "Succeeded" },
        "next_uri": next_uri,
        "final_uri": final_uri,
        "kill_uri": format!("/v1/query/{}/kill", id),
        "stats": {"running_time_ms": 1.0}
    })
}

pub fn builder(transport: Arc<MockTransport>) -> QuarryLinkClientBuilder {
    QuarryLinkClient::builder()
        .base_url(NODE)
        .connection_options(ConnectionOptions::new().with_heartbeat(false))
        .transport(transport)
}

pub fn client(transport: Arc<MockTransport>) -> QuarryLinkClient {
    builder(transport).build().unwrap()
}
