use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::error_detail::ErrorDetail;
use super::query_affect::QueryAffect;
use super::schema_field::SchemaField;
use super::session::SessionState;

/// One page of a query result, as returned by submit and by every advance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResults {
    /// Server-assigned query id
    #[serde(default)]
    pub id: String,

    /// Node that executes the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Replacement session, when the server changed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionState>,

    #[serde(default)]
    pub schema: Vec<SchemaField>,

    /// Raw cells, row-major, aligned with `schema`
    #[serde(default)]
    pub data: Vec<Vec<JsonValue>>,

    #[serde(default)]
    pub state: ExecutionState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,

    #[serde(default)]
    pub stats: QueryStats,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affect: Option<QueryAffect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_uri: Option<String>,
}

impl QueryResults {
    /// Whether the server has more pages after this one.
    ///
    /// A missing `next_uri`, or one pointing at the final URI, ends pagination.
    pub fn has_next_page(&self) -> bool {
        match (&self.next_uri, &self.final_uri) {
            (None, _) => false,
            (Some(next), Some(final_uri)) => next != final_uri,
            (Some(_), None) => true,
        }
    }

    /// URI that releases the query server-side: final if known, else kill.
    pub fn terminal_uri(&self) -> Option<&str> {
        self.final_uri.as_deref().or(self.kill_uri.as_deref())
    }
}

/// Execution state reported with every page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionState {
    Starting,
    #[default]
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Other,
}

/// Execution statistics attached to a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    #[serde(default)]
    pub running_time_ms: f64,
    #[serde(default)]
    pub scan_progress: Progress,
    #[serde(default)]
    pub write_progress: Progress,
    #[serde(default)]
    pub result_progress: Progress,
}

/// Rows and bytes processed by one phase of execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub bytes: u64,
}
