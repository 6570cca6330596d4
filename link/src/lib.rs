//! # quarry-link
//!
//! Client library for the paginated HTTP query protocol of the Quarry SQL
//! engine.
//!
//! A query is submitted to one node of the cluster, then drained page by
//! page from that same node. The library handles retries with backoff,
//! node selection and discovery, session echoing, keepalive heartbeats of
//! slow-draining queries, and typed decoding of result cells.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quarry_link::{LoadBalancingPolicy, QuarryLinkClient};
//!
//! # async fn example() -> quarry_link::Result<()> {
//! let client = QuarryLinkClient::builder()
//!     .base_urls(["http://node1:8000", "http://node2:8000"])
//!     .load_balancing_policy(LoadBalancingPolicy::RoundRobin)
//!     .database("default")
//!     .build()?;
//!
//! let mut rows = client.query_rows("SELECT number FROM numbers(10)").await?;
//! while let Some(row) = rows.next_row().await {
//!     let row = row?;
//!     println!("{}", row[0]);
//! }
//! rows.close().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod heartbeat;
pub mod models;
pub mod query;
pub mod retry;
pub mod router;
pub mod stream;
pub mod timeouts;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use auth::AuthProvider;
pub use client::{QuarryLinkClient, QuarryLinkClientBuilder};
pub use error::{QuarryLinkError, Result};
pub use heartbeat::LivenessMonitor;
pub use models::{
    ConnectionOptions, DiscoveryNode, ErrorDetail, ExecutionState, HttpVersion, PaginationConfig,
    QueryAffect, QueryResults, SchemaField, ServerInfo, SessionState, StageAttachment,
};
pub use query::{QueryCloser, QueryHandle, QueryOptions, QueryState};
pub use retry::{is_retryable_code, RetryConfig, RetryOptions, RetryPolicy};
pub use router::{LoadBalancingPolicy, NodeRouter};
pub use stream::RowStream;
pub use timeouts::{QuarryLinkTimeouts, QuarryLinkTimeoutsBuilder};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{decode_value, DataType, Interval, Row, RowDecoder, Value};
