//! Query session state machine.
//!
//! A [`QueryHandle`] owns one query from submission to close:
//! `Submitted -> Running (advance ...) -> Succeeded | Failed -> Closed`.
//! It pins every follow-up request to the node that accepted the submission,
//! echoes the server-provided session back, and decodes the rows of the
//! current page on demand.

use crate::client::LinkContext;
use crate::error::{QuarryLinkError, Result};
use crate::models::{
    QueryAffect, QueryRequest, QueryResults, SchemaField, SessionState, StageAttachment,
};
use crate::retry::RetryOptions;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::types::{Row, RowDecoder};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Submission endpoint.
pub const QUERY_PATH: &str = "/v1/query";

/// Request header carrying the query id.
pub const HEADER_QUERY_ID: &str = "X-QUERY-ID";

/// Opaque routing hint set by the server and echoed back by the client.
pub const HEADER_ROUTE_HINT: &str = "X-ROUTE-HINT";

/// Request header pinning follow-up requests to the serving node.
pub const HEADER_STICKY_NODE: &str = "X-STICKY-NODE";

/// Per-query submission options.
///
/// # Example
///
/// ```rust
/// use quarry_link::QueryOptions;
///
/// let options = QueryOptions::new()
///     .with_query_id("nightly-report-42")
///     .with_setting("max_threads", "4");
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Client-chosen query id; a UUID v4 is generated when absent
    pub query_id: Option<String>,

    /// Settings applied on top of the client session for this query only
    pub settings: BTreeMap<String, String>,

    pub stage_attachment: Option<StageAttachment>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_stage_attachment(mut self, stage: StageAttachment) -> Self {
        self.stage_attachment = Some(stage);
        self
    }
}

/// Lifecycle state of a [`QueryHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Request sent, no page accepted yet
    Submitted,
    /// More pages are pending
    Running,
    /// Last page received
    Succeeded,
    /// The server reported an error for the query
    Failed,
    /// Released: finalized, closed by the caller, or abandoned
    Closed,
}

/// Request that releases the query server-side.
#[derive(Debug, Clone)]
struct CloseTarget {
    url: Url,
    headers: Vec<(String, String)>,
}

/// State of one query shared with its closer and its heartbeat.
///
/// Pagination never reads these fields back; they are published snapshots.
struct QueryShared {
    finished: AtomicBool,
    query_id: RwLock<String>,
    node_id: RwLock<Option<String>>,
    close_target: Mutex<Option<CloseTarget>>,
    transport: Arc<dyn HttpTransport>,
}

/// Close capability of one query, cloneable across tasks.
///
/// Closing is idempotent: whichever caller flips the finished flag first sends
/// the single release request; every other call is a no-op.
#[derive(Clone)]
pub struct QueryCloser {
    shared: Arc<QueryShared>,
}

impl QueryCloser {
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    pub fn query_id(&self) -> String {
        self.shared.query_id.read().clone()
    }

    /// Last node id reported by the server for this query.
    pub fn node_id(&self) -> Option<String> {
        self.shared.node_id.read().clone()
    }

    /// Mark the query finished and release it server-side.
    ///
    /// Returns `true` for the one call that performed the close. Failures of
    /// the release request are logged and swallowed.
    pub async fn close(&self) -> bool {
        if self
            .shared
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let target = self.shared.close_target.lock().take();
        let query_id = self.query_id();
        let Some(target) = target else {
            debug!("[LINK_QUERY] Query {} finished without a release URI", query_id);
            return true;
        };

        let mut request = HttpRequest::get(target.url);
        request.headers = target.headers;
        match self.shared.transport.execute(request).await {
            Ok(response) => debug!(
                "[LINK_QUERY] Released query {} (status={})",
                query_id, response.status
            ),
            Err(e) => warn!("[LINK_QUERY] Ignoring release failure for query {}: {}", query_id, e),
        }
        true
    }

    /// Mark the query finished without any network call.
    fn abandon(&self) {
        self.shared.finished.store(true, Ordering::Release);
        self.shared.close_target.lock().take();
    }

    fn publish(&self, query_id: &str, node_id: Option<&str>, target: Option<CloseTarget>) {
        *self.shared.query_id.write() = query_id.to_string();
        if let Some(node_id) = node_id {
            *self.shared.node_id.write() = Some(node_id.to_string());
        }
        *self.shared.close_target.lock() = target;
    }
}

/// One submitted query and its current page.
///
/// `advance` calls are sequential by construction (`&mut self`); closing from
/// another task goes through a [`QueryCloser`].
pub struct QueryHandle {
    ctx: Arc<LinkContext>,
    sql: String,
    query_id: String,
    node: Url,
    headers: Vec<(String, String)>,
    session: SessionState,
    page: QueryResults,
    decoder: RowDecoder,
    state: QueryState,
    closer: QueryCloser,
    cancel: CancellationToken,
}

impl QueryHandle {
    /// Submit `sql` and wait for the first page.
    pub(crate) async fn submit(
        ctx: Arc<LinkContext>,
        sql: &str,
        options: QueryOptions,
    ) -> Result<Self> {
        if ctx.cancel.is_cancelled() {
            return Err(QuarryLinkError::Cancelled);
        }

        let query_id = options
            .query_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut session = ctx.session();
        session.settings.extend(options.settings);

        let node = ctx.router.pick_uri(&query_id);

        let body = QueryRequest {
            sql: sql.to_string(),
            session_id: None,
            pagination: ctx.options.pagination,
            session: session.clone(),
            stage_attachment: options.stage_attachment,
        };
        let body = serde_json::to_string(&body)?;

        let mut headers = vec![(HEADER_QUERY_ID.to_string(), query_id.clone())];
        if session.need_sticky {
            if let Some(node_id) = ctx.sticky_node() {
                headers.push((HEADER_STICKY_NODE.to_string(), node_id));
            }
        }

        let cancel = ctx.cancel.child_token();
        let closer = QueryCloser {
            shared: Arc::new(QueryShared {
                finished: AtomicBool::new(false),
                query_id: RwLock::new(query_id.clone()),
                node_id: RwLock::new(None),
                close_target: Mutex::new(None),
                transport: Arc::clone(&ctx.transport),
            }),
        };
        let mut handle = Self {
            ctx,
            sql: sql.to_string(),
            query_id,
            node,
            headers,
            session,
            page: QueryResults::default(),
            decoder: RowDecoder::default(),
            state: QueryState::Submitted,
            closer,
            cancel,
        };

        let start = Instant::now();
        debug!(
            "[LINK_QUERY] Submitting query {} to {}: \"{}\" (len={})",
            handle.query_id,
            handle.node,
            sql_preview(sql),
            sql.len()
        );

        let response = handle.send_submission(body).await?;
        let page = parse_page(&response)
            .map_err(|e| QuarryLinkError::SubmissionFailed(Box::new(e)))?;
        handle.accept(response, page)?;

        debug!(
            "[LINK_QUERY] Query {} accepted by node {:?} in {}ms (state={:?})",
            handle.query_id,
            handle.page.node_id,
            start.elapsed().as_millis(),
            handle.state
        );
        Ok(handle)
    }

    /// POST the submission, moving to another candidate node while the
    /// current one cannot be reached. A pinned session never moves.
    async fn send_submission(&mut self, body: String) -> Result<HttpResponse> {
        let pinned = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(HEADER_STICKY_NODE));
        let budget = if pinned {
            0
        } else {
            self.ctx.options.max_failover_attempts
        };
        let mut tried: Vec<Url> = Vec::new();

        loop {
            let url = self
                .node
                .join(QUERY_PATH)
                .map_err(|e| QuarryLinkError::ConfigurationError(e.to_string()))?;
            let request = self.request(HttpRequest::post_json(url, body.clone()));
            let err = match self
                .ctx
                .retry
                .send(
                    self.ctx.transport.as_ref(),
                    &request,
                    RetryOptions::QUERY,
                    &self.cancel,
                )
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !err.is_connection_failure() || tried.len() >= budget {
                return Err(submission_error(err, &self.query_id));
            }
            tried.push(self.node.clone());
            let Some(next) = self.ctx.router.failover_uri(&tried) else {
                return Err(submission_error(err, &self.query_id));
            };
            warn!(
                "[LINK_QUERY] Node {} unreachable for query {}, failing over to {}: {}",
                self.node, self.query_id, next, err
            );
            self.node = next;
        }
    }

    /// Fetch the next page.
    ///
    /// Returns `false` without any request once the query is finished. When
    /// the current page is the last one, the query is finalized instead and
    /// `false` is returned.
    pub async fn advance(&mut self) -> Result<bool> {
        if self.is_finished() {
            return Ok(false);
        }
        let next_uri = match self.page.next_uri.clone() {
            Some(next) if self.page.has_next_page() => next,
            _ => {
                debug!("[LINK_QUERY] Query {} has no more pages, finalizing", self.query_id);
                self.close().await;
                return Ok(false);
            },
        };

        let url = self.node.join(&next_uri).map_err(|e| {
            QuarryLinkError::SerializationError(format!("invalid next_uri '{}': {}", next_uri, e))
        })?;
        let request = self.request(HttpRequest::get(url));
        let outcome = self
            .ctx
            .retry
            .send(
                self.ctx.transport.as_ref(),
                &request,
                RetryOptions::QUERY,
                &self.cancel,
            )
            .await;
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.fail(&e).await;
                return Err(e.with_query_id(&self.query_id));
            },
        };

        if self.is_finished() {
            // closed while the page was in flight
            return Ok(false);
        }
        let page = parse_page(&response)?;
        self.accept(response, page)?;
        Ok(true)
    }

    /// Terminal failure of a page fetch. Server errors mean the query is
    /// already gone; anything else still gets a best-effort release.
    async fn fail(&mut self, err: &QuarryLinkError) {
        if self.is_finished() {
            return;
        }
        self.state = QueryState::Failed;
        if matches!(err, QuarryLinkError::QueryFailed { .. }) {
            self.closer.abandon();
        } else {
            self.closer.close().await;
        }
    }

    /// Release the query. Idempotent; later calls send nothing.
    pub async fn close(&mut self) {
        self.closer.close().await;
        self.state = QueryState::Closed;
    }

    /// Decoded rows of the current page.
    pub fn rows(&self) -> Result<Vec<Row>> {
        self.decoder.decode_page(&self.page.data)
    }

    /// Session as last echoed by the server.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn page(&self) -> &QueryResults {
        &self.page
    }

    pub fn schema(&self) -> &[SchemaField] {
        &self.page.schema
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Node id reported by the server, if any.
    pub fn node_id(&self) -> Option<&str> {
        self.page.node_id.as_deref()
    }

    /// URI all requests of this query are sent to.
    pub fn node(&self) -> &Url {
        &self.node
    }

    pub fn state(&self) -> QueryState {
        if self.is_finished() && self.state != QueryState::Failed {
            return QueryState::Closed;
        }
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.closer.is_finished()
    }

    /// Whether advancing may still produce rows.
    pub fn has_pending(&self) -> bool {
        !self.is_finished() && self.page.has_next_page()
    }

    /// Header value this query currently sends, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn closer(&self) -> QueryCloser {
        self.closer.clone()
    }

    /// Token cancelled when this query is closed through its stream or the
    /// client is shut down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Client headers plus the headers accumulated by this query.
    fn request(&self, mut request: HttpRequest) -> HttpRequest {
        for (name, value) in self.ctx.headers.iter().chain(self.headers.iter()) {
            request = request.with_header(name.clone(), value.clone());
        }
        request
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Apply a page received from the server.
    fn accept(&mut self, response: HttpResponse, page: QueryResults) -> Result<()> {
        if let Some(hint) = response.header(HEADER_ROUTE_HINT) {
            let hint = hint.to_string();
            self.set_header(HEADER_ROUTE_HINT, &hint);
        }

        if !page.id.is_empty() {
            if self.header(HEADER_QUERY_ID).is_none() {
                self.set_header(HEADER_QUERY_ID, &page.id);
            }
            self.query_id = page.id.clone();
        }

        if let Some(error) = &page.error {
            warn!(
                "[LINK_QUERY] Query {} failed on the server: [{}] {}",
                self.query_id, error.code, error.message
            );
            let err = QuarryLinkError::QueryFailed {
                query_id: Some(self.query_id.clone()),
                status_code: Some(response.status),
                code: error.code,
                message: error.message.clone(),
            };
            self.state = QueryState::Failed;
            self.closer.abandon();
            self.page = page;
            return Err(err);
        }

        if let Some(session) = &page.session {
            self.session = session.clone();
            self.ctx.replace_session(session.clone(), page.node_id.as_deref());
        }
        if let Some(node_id) = &page.node_id {
            let node_id = node_id.clone();
            self.set_header(HEADER_STICKY_NODE, &node_id);
        }
        if let Some(affect) = &page.affect {
            log_affect(&self.query_id, affect);
        }
        if !page.schema.is_empty() {
            self.decoder = RowDecoder::new(&page.schema)?;
        }

        let target = match page.terminal_uri() {
            Some(uri) => Some(CloseTarget {
                url: self.node.join(uri).map_err(|e| {
                    QuarryLinkError::SerializationError(format!("invalid final_uri '{}': {}", uri, e))
                })?,
                headers: self.request(HttpRequest::get(self.node.clone())).headers,
            }),
            None => None,
        };
        self.closer
            .publish(&self.query_id, page.node_id.as_deref(), target);

        self.state = if page.has_next_page() {
            QueryState::Running
        } else {
            QueryState::Succeeded
        };
        self.page = page;
        Ok(())
    }
}

fn parse_page(response: &HttpResponse) -> Result<QueryResults> {
    serde_json::from_str(&response.body).map_err(|e| {
        QuarryLinkError::SerializationError(format!("invalid query response: {}", e))
    })
}

/// Classify a failure of the submission request.
///
/// Structured server errors stay [`QuarryLinkError::QueryFailed`]; transport,
/// HTTP and exhaustion failures are wrapped as submission failures.
fn submission_error(err: QuarryLinkError, query_id: &str) -> QuarryLinkError {
    match err {
        QuarryLinkError::QueryFailed { .. } => err.with_query_id(query_id),
        QuarryLinkError::Cancelled => err,
        other => QuarryLinkError::SubmissionFailed(Box::new(other)).with_query_id(query_id),
    }
}

fn log_affect(query_id: &str, affect: &QueryAffect) {
    match affect {
        QueryAffect::UseDb { name } => {
            debug!("[LINK_QUERY] Query {} switched database to '{}'", query_id, name)
        },
        QueryAffect::ChangeSettings { keys, values, .. } => debug!(
            "[LINK_QUERY] Query {} changed settings {:?} = {:?}",
            query_id, keys, values
        ),
        QueryAffect::Create { kind, name, success } => debug!(
            "[LINK_QUERY] Query {} created {} '{}' (success={})",
            query_id, kind, name, success
        ),
    }
}

fn sql_preview(sql: &str) -> String {
    let flat = sql.replace('\n', " ");
    match flat.char_indices().nth(80) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
