//! Edge node control endpoint client.
//!
//! Every edge node exposes its applied limit table over HTTP:
//! - `GET /?list` returns the table as a JSON array of [`LimitEntry`]
//! - `POST /` with one [`LimitEntry`] creates or updates a bucket's row
//! - `DELETE /?LimitBucketName=<name>` removes a bucket's row
//!
//! Any non-200 answer is a failure of that call.

mod http;
mod mock;

pub use http::HttpEdgeClient;
pub use mock::{EdgeCall, MockEdgeClient};

use crate::error::EdgeResult;
use async_trait::async_trait;
use edge_limit_types::LimitEntry;

/// Calls the reconciler makes against one edge node.
///
/// `node` is the address as configured (`host:port` or a full base URL).
#[async_trait]
pub trait EdgeClient: Send + Sync {
    /// Fetch the node's applied limit table.
    async fn fetch_limits(&self, node: &str) -> EdgeResult<Vec<LimitEntry>>;

    /// Create or update one bucket's row on the node.
    async fn push_limit(&self, node: &str, entry: &LimitEntry) -> EdgeResult<()>;

    /// Remove one bucket's row from the node.
    async fn delete_limit(&self, node: &str, bucket_name: &str) -> EdgeResult<()>;
}

/// Base URL for a configured node address, without a trailing slash.
pub fn base_url(node: &str) -> String {
    let node = node.trim_end_matches('/');
    if node.contains("://") {
        node.to_string()
    } else {
        format!("http://{node}")
    }
}
