//! Candidate node selection and discovery.
//!
//! A [`NodeRouter`] owns the list of server URIs one client may talk to and
//! picks the target of each query submission according to its
//! [`LoadBalancingPolicy`]. Follow-up requests of a query never go through the
//! router: they stay on the node that accepted the submission.

use crate::error::{QuarryLinkError, Result};
use crate::models::{DiscoveryNode, ErrorEnvelope};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::transport::{HttpRequest, HttpTransport};
use log::{debug, info};
use parking_lot::RwLock;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path of the discovery endpoint.
pub const DISCOVERY_PATH: &str = "/v1/discovery_nodes";

const HASH_SEED: u32 = 0x9747_b28c;
const HASH_MULTIPLIER: u32 = 31;

/// How submissions are spread over the candidate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    /// Always the first configured node
    #[default]
    Disabled,

    /// Hash of the query id: sticky per query, spread across queries
    Random,

    /// Shared cursor advancing on every pick
    RoundRobin,
}

/// Polynomial hash of a query id with a fixed seed.
fn query_hash(query_id: &str) -> u32 {
    query_id.bytes().fold(HASH_SEED, |hash, byte| {
        hash.wrapping_mul(HASH_MULTIPLIER).wrapping_add(u32::from(byte))
    })
}

/// Candidate server nodes plus the policy choosing among them.
///
/// The node list is replaced wholesale on rediscovery; readers always see
/// either the old or the new list, never a mix.
#[derive(Debug)]
pub struct NodeRouter {
    nodes: RwLock<Arc<Vec<Url>>>,
    policy: LoadBalancingPolicy,
    cursor: AtomicUsize,
}

impl NodeRouter {
    pub fn new(nodes: Vec<Url>, policy: LoadBalancingPolicy) -> Result<Self> {
        if nodes.is_empty() {
            return Err(QuarryLinkError::ConfigurationError(
                "at least one node URL is required".into(),
            ));
        }
        Ok(Self {
            nodes: RwLock::new(Arc::new(nodes)),
            policy,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn policy(&self) -> LoadBalancingPolicy {
        self.policy
    }

    /// Snapshot of the current candidate list.
    pub fn nodes(&self) -> Arc<Vec<Url>> {
        Arc::clone(&self.nodes.read())
    }

    /// Pick the node a submission keyed by `query_id` should go to.
    pub fn pick_uri(&self, query_id: &str) -> Url {
        let nodes = self.nodes();
        let len = nodes.len();
        let index = match self.policy {
            LoadBalancingPolicy::Disabled => 0,
            LoadBalancingPolicy::Random => query_hash(query_id) as usize % len,
            LoadBalancingPolicy::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % len,
        };
        nodes[index].clone()
    }

    /// Next candidate after the last entry of `tried` that is not in `tried`.
    pub fn failover_uri(&self, tried: &[Url]) -> Option<Url> {
        let nodes = self.nodes();
        let start = tried
            .last()
            .and_then(|last| nodes.iter().position(|node| node == last))
            .map_or(0, |i| i + 1);
        (0..nodes.len())
            .map(|offset| &nodes[(start + offset) % nodes.len()])
            .find(|node| !tried.contains(node))
            .cloned()
    }

    /// Replace the candidate list. Empty lists are ignored.
    pub fn replace_nodes(&self, nodes: Vec<Url>) {
        if nodes.is_empty() {
            return;
        }
        info!("[LINK_ROUTER] Candidate nodes replaced: {} node(s)", nodes.len());
        *self.nodes.write() = Arc::new(nodes);
    }

    /// Query the discovery endpoint of `base` and replace the candidate list.
    ///
    /// Returns [`QuarryLinkError::DiscoveryUnsupported`] when the server
    /// answers 404; the existing list is kept in that case.
    pub async fn discover(
        &self,
        base: &Url,
        transport: &dyn HttpTransport,
        retry: &RetryPolicy,
        headers: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveryNode>> {
        let url = base
            .join(DISCOVERY_PATH)
            .map_err(|e| QuarryLinkError::ConfigurationError(e.to_string()))?;
        let mut request = HttpRequest::get(url);
        for (name, value) in headers {
            request = request.with_header(name.clone(), value.clone());
        }

        let response = retry.send(transport, &request, RetryOptions::PROBE, cancel).await?;
        if response.status == 404 {
            debug!("[LINK_ROUTER] {} does not support discovery", base);
            return Err(QuarryLinkError::DiscoveryUnsupported);
        }

        let nodes = parse_discovery_body(&response.body)?;
        let urls = nodes
            .iter()
            .map(|node| node_url(base, &node.address))
            .collect::<Result<Vec<_>>>()?;
        self.replace_nodes(urls);
        Ok(nodes)
    }
}

fn parse_discovery_body(body: &str) -> Result<Vec<DiscoveryNode>> {
    if let Ok(nodes) = serde_json::from_str::<Vec<DiscoveryNode>>(body) {
        return Ok(nodes);
    }
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return Err(QuarryLinkError::QueryFailed {
            query_id: None,
            status_code: Some(200),
            code: envelope.error.code,
            message: envelope.error.message,
        });
    }
    Err(QuarryLinkError::SerializationError(format!(
        "unexpected discovery response: {}",
        body
    )))
}

/// Build a node URL from a discovered `host:port`, keeping the scheme of `base`.
fn node_url(base: &Url, address: &str) -> Result<Url> {
    let text = if address.contains("://") {
        address.to_string()
    } else {
        format!("{}://{}", base.scheme(), address)
    };
    Url::parse(&text).map_err(|e| {
        QuarryLinkError::SerializationError(format!("invalid node address '{}': {}", address, e))
    })
}
