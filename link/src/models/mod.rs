//! Data models for the quarry-link client library.
//!
//! Defines the JSON request and response structures of the query-session
//! protocol: submission, result pages, session state, discovery and
//! heartbeat messages.

pub mod connection_options;
pub mod discovery_node;
pub mod error_detail;
pub mod heartbeat;
pub mod http_version;
pub mod query_affect;
pub mod query_request;
pub mod query_response;
pub mod schema_field;
pub mod server_info;
pub mod session;


pub use connection_options::ConnectionOptions;
pub use discovery_node::DiscoveryNode;
pub use error_detail::{ErrorDetail, ErrorEnvelope};
pub use heartbeat::{HeartbeatRequest, HeartbeatResponse};
pub use http_version::HttpVersion;
pub use query_affect::QueryAffect;
pub use query_request::{PaginationConfig, QueryRequest, StageAttachment};
pub use query_response::{ExecutionState, Progress, QueryResults, QueryStats};
pub use schema_field::SchemaField;
pub use server_info::ServerInfo;
pub use session::SessionState;
