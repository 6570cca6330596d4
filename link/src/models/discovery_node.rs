use serde::{Deserialize, Serialize};

/// One server node returned by the discovery endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryNode {
    /// `host:port` the node accepts protocol requests on
    pub address: String,
}
