//! Error types for quarry-link.
//!
//! Every fallible operation in the crate returns [`QuarryLinkError`]. The
//! variants follow the failure classes of the query protocol: connection
//! failures are retried inside the retry policy, structured server errors are
//! terminal, and decode errors fail the page that carried the bad cell.

use thiserror::Error;

/// Result type for quarry-link operations
pub type Result<T> = std::result::Result<T, QuarryLinkError>;

/// Errors that can occur while driving a query against the server
#[derive(Error, Debug)]
pub enum QuarryLinkError {
    /// Connection-level failure (connect refused, reset, timeout).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Non-2xx response without a recognized structured error body.
    #[error("HTTP {status_code} from {url}: {body}")]
    HttpStatus {
        url: String,
        status_code: u16,
        body: String,
    },

    /// Structured `{code, message}` error reported by the server.
    ///
    /// The query (or discovery request) reached the server and was rejected
    /// there; it is never retried.
    #[error("Query failed{}: [{code}] {message}", fmt_query_id(.query_id))]
    QueryFailed {
        query_id: Option<String>,
        status_code: Option<u16>,
        code: i64,
        message: String,
    },

    /// Every attempt of a retried request failed.
    #[error(
        "Request to {url} failed after {attempts} attempts in {elapsed_ms}ms: {reason}"
    )]
    RetriesExhausted {
        url: String,
        attempts: u32,
        elapsed_ms: u128,
        last_status: Option<u16>,
        reason: String,
    },

    /// Transport or HTTP failure before the first page was obtained.
    #[error("Failed to submit query: {0}")]
    SubmissionFailed(Box<QuarryLinkError>),

    /// A cell value did not match its declared column type.
    #[error("Type error: {0}")]
    TypeError(String),

    /// The server does not implement the discovery endpoint.
    #[error("Node discovery is not supported by the server")]
    DiscoveryUnsupported,

    /// The operation was interrupted by a close or cancellation.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

fn fmt_query_id(query_id: &Option<String>) -> String {
    match query_id {
        Some(id) => format!(" (query_id={})", id),
        None => String::new(),
    }
}

impl QuarryLinkError {
    /// Query id the error is correlated with, if one was known.
    pub fn query_id(&self) -> Option<&str> {
        match self {
            Self::QueryFailed { query_id, .. } => query_id.as_deref(),
            Self::SubmissionFailed(inner) => inner.query_id(),
            _ => None,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            Self::QueryFailed { status_code, .. } => *status_code,
            Self::RetriesExhausted { last_status, .. } => *last_status,
            Self::SubmissionFailed(inner) => inner.status_code(),
            _ => None,
        }
    }

    /// Server-provided error code, if any.
    pub fn server_code(&self) -> Option<i64> {
        match self {
            Self::QueryFailed { code, .. } => Some(*code),
            Self::SubmissionFailed(inner) => inner.server_code(),
            _ => None,
        }
    }

    /// Whether the node could not be reached at all: a connection error, or
    /// retries that ended without any HTTP response.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::RetriesExhausted { last_status, .. } => last_status.is_none(),
            Self::SubmissionFailed(inner) => inner.is_connection_failure(),
            _ => false,
        }
    }

    /// Attach a query id to a structured server error that does not carry one yet.
    pub(crate) fn with_query_id(self, id: &str) -> Self {
        match self {
            Self::QueryFailed {
                query_id: None,
                status_code,
                code,
                message,
            } => Self::QueryFailed {
                query_id: Some(id.to_string()),
                status_code,
                code,
                message,
            },
            Self::SubmissionFailed(inner) => Self::SubmissionFailed(Box::new(inner.with_query_id(id))),
            other => other,
        }
    }
}

impl From<serde_json::Error> for QuarryLinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for QuarryLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::ConfigurationError(err.to_string())
        } else {
            Self::NetworkError(err.to_string())
        }
    }
}
