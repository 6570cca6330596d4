use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keepalive body: the queries the client still consumes, grouped by node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_to_queries: BTreeMap<String, Vec<String>>,
}

impl HeartbeatRequest {
    pub fn single(node_id: &str, query_id: &str) -> Self {
        let mut node_to_queries = BTreeMap::new();
        node_to_queries.insert(node_id.to_string(), vec![query_id.to_string()]);
        Self { node_to_queries }
    }
}

/// Keepalive response listing query ids the server no longer knows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub queries_to_remove: Vec<String>,
}
