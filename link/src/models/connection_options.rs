use serde::{Deserialize, Serialize};

use super::http_version::HttpVersion;
use super::query_request::PaginationConfig;
use crate::retry::RetryConfig;
use crate::router::LoadBalancingPolicy;

/// Connection-level options for the query client.
///
/// These options control how queries are dispatched and drained:
/// - HTTP protocol version (HTTP/1.1 or HTTP/2)
/// - Node selection and discovery
/// - Page sizing and the row stream buffer
/// - Retry backoff of every protocol request
///
/// # Example
///
/// ```rust
/// use quarry_link::{ConnectionOptions, HttpVersion, LoadBalancingPolicy};
///
/// let options = ConnectionOptions::default()
///     .with_http_version(HttpVersion::Http2)
///     .with_load_balancing_policy(LoadBalancingPolicy::RoundRobin)
///     .with_auto_discovery(true)
///     .with_row_buffer_capacity(10_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// HTTP protocol version to use for connections
    /// Default: Http1 (HTTP/1.1) for maximum compatibility
    #[serde(default)]
    pub http_version: HttpVersion,

    /// How submissions are spread over the configured nodes
    /// Default: Disabled (always the first node)
    #[serde(default)]
    pub load_balancing_policy: LoadBalancingPolicy,

    /// Refresh the node list from the discovery endpoint before the first query
    /// Default: false
    #[serde(default)]
    pub auto_discovery: bool,

    /// Keep slow-draining result sets alive with periodic heartbeats,
    /// on servers that advertise support
    /// Default: true
    #[serde(default = "default_enable_heartbeat")]
    pub enable_heartbeat: bool,

    /// Page sizing preferences sent with every submission
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Rows a [`RowStream`](crate::RowStream) buffers ahead of its consumer
    /// Default: 50,000
    #[serde(default = "default_row_buffer_capacity")]
    pub row_buffer_capacity: usize,

    /// Backoff of submission, page fetch and discovery requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Other nodes a submission is resent to when its node is unreachable.
    /// Page fetches never fail over.
    /// Default: 2
    #[serde(default = "default_max_failover_attempts")]
    pub max_failover_attempts: usize,
}

fn default_enable_heartbeat() -> bool {
    true
}

fn default_row_buffer_capacity() -> usize {
    50_000
}

fn default_max_failover_attempts() -> usize {
    2
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            http_version: HttpVersion::default(),
            load_balancing_policy: LoadBalancingPolicy::default(),
            auto_discovery: false,
            enable_heartbeat: default_enable_heartbeat(),
            pagination: PaginationConfig::default(),
            row_buffer_capacity: default_row_buffer_capacity(),
            retry: RetryConfig::default(),
            max_failover_attempts: default_max_failover_attempts(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the HTTP protocol version to use
    ///
    /// - `HttpVersion::Http1` - HTTP/1.1 (default, maximum compatibility)
    /// - `HttpVersion::Http2` - HTTP/2 (better performance for concurrent requests)
    /// - `HttpVersion::Auto` - Let the client negotiate with the server
    pub fn with_http_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    pub fn with_load_balancing_policy(mut self, policy: LoadBalancingPolicy) -> Self {
        self.load_balancing_policy = policy;
        self
    }

    pub fn with_auto_discovery(mut self, enabled: bool) -> Self {
        self.auto_discovery = enabled;
        self
    }

    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.enable_heartbeat = enabled;
        self
    }

    /// Set the seconds the server may hold a page request open waiting for rows
    pub fn with_wait_time_secs(mut self, secs: u64) -> Self {
        self.pagination.wait_time_secs = secs;
        self
    }

    pub fn with_max_rows_in_buffer(mut self, rows: u64) -> Self {
        self.pagination.max_rows_in_buffer = rows;
        self
    }

    pub fn with_max_rows_per_page(mut self, rows: u64) -> Self {
        self.pagination.max_rows_per_page = rows;
        self
    }

    /// Set the row stream buffer size. Zero is raised to one.
    pub fn with_row_buffer_capacity(mut self, rows: usize) -> Self {
        self.row_buffer_capacity = rows.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Zero disables failover.
    pub fn with_max_failover_attempts(mut self, attempts: usize) -> Self {
        self.max_failover_attempts = attempts;
        self
    }
}
