//! Background keepalive of queries whose rows are still being consumed.
//!
//! Servers expire result sets nobody fetched from for a while. A slow
//! consumer of a [`RowStream`](crate::RowStream) can stall the page fetch
//! loop long enough for that, so while the stream is open a
//! [`LivenessMonitor`] pings the serving node on a fixed interval.

use crate::models::{HeartbeatRequest, HeartbeatResponse};
use crate::query::QueryCloser;
use crate::transport::{HttpRequest, HttpTransport};
use log::{debug, warn};
use reqwest::Url;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

/// Heartbeat endpoint, relative to the serving node.
pub const HEARTBEAT_PATH: &str = "/v1/session/heartbeat";

const NEVER: u64 = u64::MAX;

/// Periodic keepalive for one query.
///
/// Ticks run independently of row consumption. A failed tick is logged and
/// the next tick tries again; the monitor stops when the query finishes, when
/// it is cancelled, or when the server reports the query as gone.
pub struct LivenessMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    started: TokioInstant,
    last_contact_ms: Arc<AtomicU64>,
}

impl LivenessMonitor {
    /// Spawn the ticker on the current tokio runtime.
    pub fn spawn(
        transport: Arc<dyn HttpTransport>,
        url: Url,
        headers: Vec<(String, String)>,
        closer: QueryCloser,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let started = TokioInstant::now();
        let last_contact_ms = Arc::new(AtomicU64::new(NEVER));
        let task = tokio::spawn(run_heartbeat(
            transport,
            url,
            headers,
            closer,
            interval,
            cancel.clone(),
            started,
            Arc::clone(&last_contact_ms),
        ));
        Self {
            cancel,
            task: Some(task),
            started,
            last_contact_ms,
        }
    }

    /// Instant of the last acknowledged heartbeat, if any.
    pub fn last_contact(&self) -> Option<TokioInstant> {
        match self.last_contact_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Some(self.started + Duration::from_millis(ms)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the ticker. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_heartbeat(
    transport: Arc<dyn HttpTransport>,
    url: Url,
    headers: Vec<(String, String)>,
    closer: QueryCloser,
    interval: Duration,
    cancel: CancellationToken,
    started: TokioInstant,
    last_contact_ms: Arc<AtomicU64>,
) {
    let query_id = closer.query_id();
    debug!(
        "[LINK_HEARTBEAT] Monitor for query {} started (interval={:?})",
        query_id, interval
    );
    let mut deadline = TokioInstant::now() + interval;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        deadline = TokioInstant::now() + interval;

        if closer.is_finished() {
            break;
        }

        let query_id = closer.query_id();
        let node_id = closer.node_id().unwrap_or_default();
        let body = match serde_json::to_string(&HeartbeatRequest::single(&node_id, &query_id)) {
            Ok(body) => body,
            Err(e) => {
                warn!("[LINK_HEARTBEAT] Failed to encode heartbeat: {}", e);
                break;
            },
        };
        let mut request = HttpRequest::post_json(url.clone(), body);
        for (name, value) in &headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = transport.execute(request) => outcome,
        };

        match outcome {
            Ok(response) if response.is_success() => {
                let elapsed = TokioInstant::now().duration_since(started).as_millis();
                last_contact_ms.store(elapsed.min(u128::from(NEVER - 1)) as u64, Ordering::Release);

                let ack = if response.body.trim().is_empty() {
                    HeartbeatResponse::default()
                } else {
                    match serde_json::from_str::<HeartbeatResponse>(&response.body) {
                        Ok(ack) => ack,
                        Err(e) => {
                            warn!("[LINK_HEARTBEAT] Unreadable heartbeat response: {}", e);
                            HeartbeatResponse::default()
                        },
                    }
                };
                if ack.queries_to_remove.iter().any(|id| id == &query_id) {
                    warn!(
                        "[LINK_HEARTBEAT] Server no longer holds query {}, stopping heartbeat",
                        query_id
                    );
                    break;
                }
                debug!("[LINK_HEARTBEAT] Query {} kept alive on node '{}'", query_id, node_id);
            },
            Ok(response) => warn!(
                "[LINK_HEARTBEAT] Heartbeat for query {} rejected: status={}",
                query_id, response.status
            ),
            Err(e) => warn!("[LINK_HEARTBEAT] Heartbeat for query {} failed: {}", query_id, e),
        }
    }

    debug!("[LINK_HEARTBEAT] Monitor for query {} stopped", query_id);
}
