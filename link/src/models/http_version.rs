use serde::{Deserialize, Serialize};

/// HTTP protocol version to use for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    /// HTTP/1.1 (default) - widely compatible
    #[default]
    #[serde(rename = "http1", alias = "http/1.1", alias = "1.1")]
    Http1,

    /// HTTP/2 with prior knowledge
    #[serde(rename = "http2", alias = "http/2", alias = "2")]
    Http2,

    /// Let the client negotiate the version with the server
    #[serde(rename = "auto")]
    Auto,
}
