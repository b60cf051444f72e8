//! reqwest-based edge node client.

use super::{base_url, EdgeClient};
use crate::error::{EdgeError, EdgeResult};
use async_trait::async_trait;
use edge_limit_types::LimitEntry;
use std::time::Duration;

/// HTTP client for edge node control endpoints.
///
/// Every call is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct HttpEdgeClient {
    http: reqwest::Client,
}

impl HttpEdgeClient {
    /// Create a client whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> EdgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

fn ensure_ok(url: &str, response: &reqwest::Response) -> EdgeResult<()> {
    if response.status() != reqwest::StatusCode::OK {
        return Err(EdgeError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(())
}

#[async_trait]
impl EdgeClient for HttpEdgeClient {
    async fn fetch_limits(&self, node: &str) -> EdgeResult<Vec<LimitEntry>> {
        let url = format!("{}/?list", base_url(node));
        let response = self.http.get(&url).send().await?;
        ensure_ok(&url, &response)?;

        let body = response.bytes().await?;
        Ok(LimitEntry::table_from_json(&body)?)
    }

    async fn push_limit(&self, node: &str, entry: &LimitEntry) -> EdgeResult<()> {
        let url = format!("{}/", base_url(node));
        let response = self.http.post(&url).json(entry).send().await?;
        ensure_ok(&url, &response)
    }

    async fn delete_limit(&self, node: &str, bucket_name: &str) -> EdgeResult<()> {
        let url = format!("{}/", base_url(node));
        let response = self
            .http
            .delete(&url)
            .query(&[("LimitBucketName", bucket_name)])
            .send()
            .await?;
        ensure_ok(&url, &response)
    }
}
