//! HTTP client for the node API.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest`.

mod node;

pub use node::NodeClient;

use reqwest::StatusCode;

/// Errors produced by the node client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The node answered with an error envelope.
    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    /// The node returned a non-2xx status without a readable error body.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field could not be parsed.
    #[error("invalid {field} in node response: {value}")]
    InvalidNumber { field: &'static str, value: String },

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
