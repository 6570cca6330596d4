use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::session::SessionState;

/// Request payload for submitting a query
///
/// # Example (JSON representation)
///
/// ```json
/// {
///   "sql": "SELECT number FROM numbers(3)",
///   "session": {"database": "default"},
///   "pagination": {"wait_time_secs": 10, "max_rows_in_buffer": 5000000, "max_rows_per_page": 100000}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// SQL text to execute
    pub sql: String,

    /// Server session id, when the client already holds one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub pagination: PaginationConfig,

    pub session: SessionState,

    /// Staged file the statement reads its input from (e.g. `INSERT ... VALUES` from stage)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_attachment: Option<StageAttachment>,
}

/// Page sizing preferences sent with the submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Seconds the server may hold a page request waiting for rows
    pub wait_time_secs: u64,

    /// Rows the server may buffer ahead of the client
    pub max_rows_in_buffer: u64,

    /// Upper bound of rows in one page
    pub max_rows_per_page: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: 10,
            max_rows_in_buffer: 5_000_000,
            max_rows_per_page: 100_000,
        }
    }
}

/// Reference to staged data attached to a statement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageAttachment {
    /// Stage location, e.g. `@~/upload/batch-1.csv`
    pub location: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_format_options: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub copy_options: BTreeMap<String, String>,
}
