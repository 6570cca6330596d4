use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-side session configuration echoed back on every request.
///
/// The server is authoritative: whenever a response carries a session object
/// it replaces the client's copy wholesale, never merged field by field. That
/// lets any node restore the session (current database after `USE`, settings
/// after `SET`, open transaction) without server-side affinity.
///
/// # Example (JSON representation)
///
/// ```json
/// {
///   "database": "analytics",
///   "settings": {"max_threads": "8"},
///   "need_sticky": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Current database, `None` until the server or caller picks one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Session settings as string key/values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_roles: Option<Vec<String>>,

    /// Transaction state as reported by the server (e.g. "AutoCommit", "Active")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_state: Option<String>,

    /// Server asks follow-up requests to stay on the node holding the session
    #[serde(default)]
    pub need_sticky: bool,

    /// Server asks the client to heartbeat while the session holds resources
    #[serde(default)]
    pub need_keep_alive: bool,

    /// Opaque server state, echoed back untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<String>,
}

impl SessionState {
    pub fn new(database: Option<String>, settings: BTreeMap<String, String>) -> Self {
        Self {
            database,
            settings,
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}
