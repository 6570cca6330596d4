use serde::{Deserialize, Serialize};

/// Structured error returned by the server for a failed query or request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Numeric error code
    pub code: i64,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// `{"error": {...}}` body of a non-2xx response
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}
