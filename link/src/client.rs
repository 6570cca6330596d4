//! Main quarry-link client with builder pattern.
//!
//! Provides the primary interface for submitting queries to a cluster of
//! query servers and draining their paginated results.

use crate::{
    auth::AuthProvider,
    error::{QuarryLinkError, Result},
    heartbeat::{LivenessMonitor, HEARTBEAT_PATH},
    models::{ConnectionOptions, DiscoveryNode, HttpVersion, ServerInfo, SessionState},
    query::{QueryHandle, QueryOptions},
    retry::{RetryConfig, RetryOptions, RetryPolicy},
    router::{LoadBalancingPolicy, NodeRouter},
    stream::RowStream,
    timeouts::QuarryLinkTimeouts,
    transport::{HttpRequest, HttpTransport, ReqwestTransport},
};
use log::{debug, warn};
use parking_lot::Mutex;
use reqwest::Url;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Capability probe endpoint.
pub const VERSION_PATH: &str = "/v1/version";

/// First server release that accepts query heartbeats.
pub const MIN_HEARTBEAT_VERSION: semver::Version = semver::Version::new(1, 2, 709);

fn default_user_agent() -> String {
    format!("quarry-link/{}", env!("CARGO_PKG_VERSION"))
}

/// State shared by a client and every query it submits.
pub(crate) struct LinkContext {
    pub(crate) transport: Arc<dyn HttpTransport>,
    pub(crate) retry: RetryPolicy,
    pub(crate) router: NodeRouter,
    /// Sent with every request: user agent, accept, auth, additional headers
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) options: ConnectionOptions,
    pub(crate) timeouts: QuarryLinkTimeouts,
    /// Cancelled when the client is closed
    pub(crate) cancel: CancellationToken,
    seed: Url,
    session: Mutex<SessionState>,
    sticky_node: Mutex<Option<String>>,
    heartbeat_support: Mutex<HashMap<String, bool>>,
    discovery: OnceCell<bool>,
}

impl LinkContext {
    /// Snapshot of the client-level session every new query starts from.
    pub(crate) fn session(&self) -> SessionState {
        self.session.lock().clone()
    }

    /// Replace the client-level session with the one the server returned.
    pub(crate) fn replace_session(&self, session: SessionState, node_id: Option<&str>) {
        *self.sticky_node.lock() = if session.need_sticky {
            node_id.map(str::to_string)
        } else {
            None
        };
        *self.session.lock() = session;
    }

    /// Node the current session is pinned to, if it requires stickiness.
    pub(crate) fn sticky_node(&self) -> Option<String> {
        self.sticky_node.lock().clone()
    }
}

/// Main quarry-link client.
///
/// Use [`QuarryLinkClientBuilder`] to construct instances with custom
/// configuration. Clones share the HTTP connection pool, the node list and
/// the session.
///
/// # Examples
///
/// ```rust,no_run
/// use quarry_link::QuarryLinkClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = QuarryLinkClient::builder()
///     .base_url("http://localhost:8000")
///     .database("analytics")
///     .timeout(std::time::Duration::from_secs(30))
///     .build()?;
///
/// let mut query = client.submit("SELECT number FROM numbers(3)").await?;
/// loop {
///     for row in query.rows()? {
///         println!("{:?}", row);
///     }
///     if !query.advance().await? {
///         break;
///     }
/// }
/// query.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct QuarryLinkClient {
    inner: Arc<LinkContext>,
}

impl QuarryLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> QuarryLinkClientBuilder {
        QuarryLinkClientBuilder::new()
    }

    /// Submit a query and wait for its first page.
    ///
    /// # Errors
    ///
    /// - [`QuarryLinkError::QueryFailed`] when the server rejected the query
    /// - [`QuarryLinkError::SubmissionFailed`] when no page could be obtained
    pub async fn submit(&self, sql: &str) -> Result<QueryHandle> {
        self.submit_with(sql, QueryOptions::default()).await
    }

    /// Submit a query with a caller-chosen id, setting overrides or a stage attachment.
    pub async fn submit_with(&self, sql: &str, options: QueryOptions) -> Result<QueryHandle> {
        if self.inner.options.auto_discovery {
            self.discover_once().await;
        }
        QueryHandle::submit(Arc::clone(&self.inner), sql, options).await
    }

    /// Submit a query and stream its rows across all pages.
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn example() -> quarry_link::Result<()> {
    /// # let client = quarry_link::QuarryLinkClient::builder().base_url("http://localhost:8000").build()?;
    /// use futures_util::StreamExt;
    ///
    /// let mut rows = client.query_rows("SELECT * FROM events").await?;
    /// while let Some(row) = rows.next().await {
    ///     let row = row?;
    ///     println!("{}", row[0]);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query_rows(&self, sql: &str) -> Result<RowStream> {
        self.query_rows_with(sql, QueryOptions::default()).await
    }

    pub async fn query_rows_with(&self, sql: &str, options: QueryOptions) -> Result<RowStream> {
        let handle = self.submit_with(sql, options).await?;
        let monitor = self.start_heartbeat(&handle).await;
        Ok(RowStream::spawn(
            handle,
            self.inner.options.row_buffer_capacity,
            monitor,
        ))
    }

    /// Refresh the node list from the discovery endpoint of the first
    /// configured node.
    ///
    /// Returns [`QuarryLinkError::DiscoveryUnsupported`] when the server has
    /// no discovery endpoint; the configured nodes stay in use.
    pub async fn discover(&self) -> Result<Vec<DiscoveryNode>> {
        let inner = &self.inner;
        inner
            .router
            .discover(
                &inner.seed,
                inner.transport.as_ref(),
                &inner.retry,
                &inner.headers,
                &inner.cancel,
            )
            .await
    }

    async fn discover_once(&self) {
        self.inner
            .discovery
            .get_or_init(|| async {
                match self.discover().await {
                    Ok(nodes) => {
                        debug!("[LINK_ROUTER] Auto-discovery found {} node(s)", nodes.len());
                        true
                    },
                    Err(QuarryLinkError::DiscoveryUnsupported) => {
                        debug!("[LINK_ROUTER] Discovery unsupported, keeping configured nodes");
                        false
                    },
                    Err(e) => {
                        warn!("[LINK_ROUTER] Auto-discovery failed, keeping configured nodes: {}", e);
                        false
                    },
                }
            })
            .await;
    }

    /// Client-level session the next query starts from.
    pub fn session(&self) -> SessionState {
        self.inner.session()
    }

    /// Current candidate nodes.
    pub fn nodes(&self) -> Vec<Url> {
        self.inner.router.nodes().as_ref().clone()
    }

    /// Get the configured timeouts
    pub fn timeouts(&self) -> &QuarryLinkTimeouts {
        &self.inner.timeouts
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Fetch the version a node reports, `None` if it has no version endpoint.
    pub async fn server_info(&self, node: &Url) -> Result<Option<ServerInfo>> {
        let url = node
            .join(VERSION_PATH)
            .map_err(|e| QuarryLinkError::ConfigurationError(e.to_string()))?;
        let mut request = HttpRequest::get(url);
        for (name, value) in &self.inner.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        let response = self
            .inner
            .retry
            .send(
                self.inner.transport.as_ref(),
                &request,
                RetryOptions::PROBE,
                &self.inner.cancel,
            )
            .await?;
        if response.status == 404 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&response.body)?))
    }

    /// Whether `node` accepts query heartbeats. Cached per node.
    pub async fn supports_heartbeat(&self, node: &Url) -> bool {
        let key = node.origin().ascii_serialization();
        if let Some(&known) = self.inner.heartbeat_support.lock().get(&key) {
            return known;
        }

        let supported = match self.server_info(node).await {
            Ok(Some(info)) => info
                .version_core()
                .is_some_and(|version| version >= MIN_HEARTBEAT_VERSION),
            Ok(None) => false,
            Err(e) => {
                warn!("[LINK_HEARTBEAT] Capability probe of {} failed: {}", key, e);
                return false;
            },
        };
        debug!("[LINK_HEARTBEAT] {} heartbeat support: {}", key, supported);
        self.inner.heartbeat_support.lock().insert(key, supported);
        supported
    }

    async fn start_heartbeat(&self, handle: &QueryHandle) -> Option<LivenessMonitor> {
        let inner = &self.inner;
        if !inner.options.enable_heartbeat
            || !inner.timeouts.heartbeat_enabled()
            || handle.is_finished()
        {
            return None;
        }
        if !self.supports_heartbeat(handle.node()).await {
            return None;
        }
        let url = match handle.node().join(HEARTBEAT_PATH) {
            Ok(url) => url,
            Err(e) => {
                warn!("[LINK_HEARTBEAT] Invalid heartbeat URL for {}: {}", handle.node(), e);
                return None;
            },
        };
        Some(LivenessMonitor::spawn(
            Arc::clone(&inner.transport),
            url,
            inner.headers.clone(),
            handle.closer(),
            inner.timeouts.heartbeat_interval,
            handle.cancel_token().child_token(),
        ))
    }

    /// Close the client: in-flight retries abort with
    /// [`QuarryLinkError::Cancelled`], heartbeats stop, and later submissions fail.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

/// Builder for configuring [`QuarryLinkClient`] instances.
pub struct QuarryLinkClientBuilder {
    base_urls: Vec<String>,
    timeout: Duration,
    auth: AuthProvider,
    timeouts: QuarryLinkTimeouts,
    connection_options: ConnectionOptions,
    database: Option<String>,
    settings: BTreeMap<String, String>,
    additional_headers: Vec<(String, String)>,
    user_agent: Option<String>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl QuarryLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_urls: Vec::new(),
            timeout: Duration::from_secs(60),
            auth: AuthProvider::none(),
            timeouts: QuarryLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            database: None,
            settings: BTreeMap::new(),
            additional_headers: Vec::new(),
            user_agent: None,
            transport: None,
        }
    }

    /// Set the base URL of the query server
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_urls = vec![url.into()];
        self
    }

    /// Set several candidate nodes; the first one also serves discovery.
    pub fn base_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set request timeout (for HTTP requests)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set JWT token authentication
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::jwt_token(token.into());
        self
    }

    /// Set authentication provider directly
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use quarry_link::{QuarryLinkClient, AuthProvider};
    ///
    /// # fn example() -> quarry_link::Result<()> {
    /// let client = QuarryLinkClient::builder()
    ///     .base_url("http://localhost:8000")
    ///     .auth(AuthProvider::basic_auth("alice".to_string(), "secret".to_string()))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Set comprehensive timeout configuration for all operations
    ///
    /// This overrides individual timeout settings like `timeout()`.
    pub fn timeouts(mut self, timeouts: QuarryLinkTimeouts) -> Self {
        self.timeout = timeouts.receive_timeout;
        self.timeouts = timeouts;
        self
    }

    /// Set connection options for dispatch, paging and retries
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use quarry_link::{QuarryLinkClient, ConnectionOptions, HttpVersion};
    ///
    /// # fn example() -> quarry_link::Result<()> {
    /// let client = QuarryLinkClient::builder()
    ///     .base_url("http://localhost:8000")
    ///     .connection_options(
    ///         ConnectionOptions::new()
    ///             .with_http_version(HttpVersion::Http2)
    ///             .with_auto_discovery(true)
    ///     )
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Set the HTTP protocol version to use
    ///
    /// - `HttpVersion::Http1` - HTTP/1.1 (default, maximum compatibility)
    /// - `HttpVersion::Http2` - HTTP/2 (multiplexing, better for concurrent requests)
    /// - `HttpVersion::Auto` - Let the client negotiate with the server
    pub fn http_version(mut self, version: HttpVersion) -> Self {
        self.connection_options.http_version = version;
        self
    }

    pub fn load_balancing_policy(mut self, policy: LoadBalancingPolicy) -> Self {
        self.connection_options.load_balancing_policy = policy;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.connection_options.retry = retry;
        self
    }

    /// Other nodes an unreachable submission may be resent to
    pub fn max_failover_attempts(mut self, attempts: usize) -> Self {
        self.connection_options.max_failover_attempts = attempts;
        self
    }

    /// Database the session starts in
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Initial session setting, echoed with every query
    pub fn session_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Extra header sent with every request
    pub fn additional_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Use a custom transport instead of the pooled reqwest client
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(mut self) -> Result<QuarryLinkClient> {
        if self.base_urls.is_empty() {
            return Err(QuarryLinkError::ConfigurationError("base_url is required".into()));
        }
        let nodes = self
            .base_urls
            .iter()
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|e| {
                    QuarryLinkError::ConfigurationError(format!("invalid base_url '{}': {}", raw, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let seed = nodes[0].clone();
        let router = NodeRouter::new(nodes, self.connection_options.load_balancing_policy)?;

        let transport: Arc<dyn HttpTransport> = match self.transport.take() {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.build_http_client()?)),
        };

        let mut headers = vec![
            (
                "User-Agent".to_string(),
                self.user_agent.unwrap_or_else(default_user_agent),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(authorization) = self.auth.authorization_header() {
            headers.push(("Authorization".to_string(), authorization));
        }
        headers.extend(self.additional_headers);

        let session = SessionState::new(self.database, self.settings);
        debug!(
            "[LINK_QUERY] Client ready: nodes={} policy={:?} auto_discovery={}",
            router.nodes().len(),
            router.policy(),
            self.connection_options.auto_discovery
        );

        Ok(QuarryLinkClient {
            inner: Arc::new(LinkContext {
                transport,
                retry: RetryPolicy::new(self.connection_options.retry.clone()),
                router,
                headers,
                options: self.connection_options,
                timeouts: self.timeouts,
                cancel: CancellationToken::new(),
                seed,
                session: Mutex::new(session),
                sticky_node: Mutex::new(None),
                heartbeat_support: Mutex::new(HashMap::new()),
                discovery: OnceCell::new(),
            }),
        })
    }

    fn build_http_client(&self) -> Result<reqwest::Client> {
        // Build HTTP client with connection pooling for better throughput
        let mut client_builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeouts.connection_timeout)
            .pool_max_idle_per_host(10)
            // Keep idle connections for 90 seconds (slightly longer than server's 75s)
            .pool_idle_timeout(Duration::from_secs(90));

        client_builder = match self.connection_options.http_version {
            HttpVersion::Http1 => {
                debug!("[LINK_HTTP] Using HTTP/1.1 only");
                client_builder.http1_only()
            },
            HttpVersion::Http2 => {
                debug!("[LINK_HTTP] Using HTTP/2 with prior knowledge");
                client_builder.http2_prior_knowledge()
            },
            HttpVersion::Auto => {
                debug!("[LINK_HTTP] Using automatic HTTP version negotiation");
                client_builder
            },
        };

        client_builder
            .build()
            .map_err(|e| QuarryLinkError::ConfigurationError(e.to_string()))
    }
}
