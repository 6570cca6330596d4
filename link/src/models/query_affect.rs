use serde::{Deserialize, Serialize};

/// Side effect a statement had on the session, reported by the server
///
/// # Example (JSON representation)
///
/// ```json
/// {"type": "UseDB", "name": "analytics"}
/// {"type": "ChangeSettings", "keys": ["max_threads"], "values": ["8"], "is_globals": [false]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueryAffect {
    Create {
        kind: String,
        name: String,
        #[serde(default)]
        success: bool,
    },
    #[serde(rename = "UseDB")]
    UseDb { name: String },
    ChangeSettings {
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        values: Vec<String>,
        #[serde(default)]
        is_globals: Vec<bool>,
    },
}
