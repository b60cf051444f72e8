//! Mock edge client for testing.
//!
//! Holds one applied table per node, applies pushes and deletes to it, and
//! records every call for verification.

use super::EdgeClient;
use crate::error::{EdgeError, EdgeResult};
use async_trait::async_trait;
use edge_limit_types::LimitEntry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeCall {
    /// `GET /?list` against a node.
    Fetch(String),
    /// `POST /` of an entry to a node.
    Push(String, LimitEntry),
    /// `DELETE /?LimitBucketName=` of a bucket on a node.
    Delete(String, String),
}

/// Mock edge client.
#[derive(Debug, Default, Clone)]
pub struct MockEdgeClient {
    inner: Arc<Mutex<MockEdgeInner>>,
}

#[derive(Debug, Default)]
struct MockEdgeInner {
    tables: HashMap<String, Vec<LimitEntry>>,
    calls: Vec<EdgeCall>,
    unreachable: HashSet<String>,
    rejected_buckets: HashSet<String>,
}

impl MockEdgeClient {
    /// Create a mock where every node starts with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockEdgeInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set a node's applied table.
    pub fn set_table(&self, node: &str, table: Vec<LimitEntry>) {
        self.lock().tables.insert(node.to_string(), table);
    }

    /// A node's applied table.
    pub fn table(&self, node: &str) -> Vec<LimitEntry> {
        self.lock().tables.get(node).cloned().unwrap_or_default()
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<EdgeCall> {
        self.lock().calls.clone()
    }

    /// Return and forget every call so far.
    pub fn take_calls(&self) -> Vec<EdgeCall> {
        std::mem::take(&mut self.lock().calls)
    }

    /// Make every call to `node` fail until [`recover_node`](Self::recover_node).
    pub fn fail_node(&self, node: &str) {
        self.lock().unreachable.insert(node.to_string());
    }

    /// Undo [`fail_node`](Self::fail_node).
    pub fn recover_node(&self, node: &str) {
        self.lock().unreachable.remove(node);
    }

    /// Make every push of `bucket_name` fail.
    pub fn reject_bucket(&self, bucket_name: &str) {
        self.lock().rejected_buckets.insert(bucket_name.to_string());
    }
}

fn unavailable(node: &str) -> EdgeError {
    EdgeError::Status {
        url: format!("mock://{node}/"),
        status: 503,
    }
}

#[async_trait]
impl EdgeClient for MockEdgeClient {
    async fn fetch_limits(&self, node: &str) -> EdgeResult<Vec<LimitEntry>> {
        let mut inner = self.lock();
        inner.calls.push(EdgeCall::Fetch(node.to_string()));
        if inner.unreachable.contains(node) {
            return Err(unavailable(node));
        }
        Ok(inner.tables.get(node).cloned().unwrap_or_default())
    }

    async fn push_limit(&self, node: &str, entry: &LimitEntry) -> EdgeResult<()> {
        let mut inner = self.lock();
        inner
            .calls
            .push(EdgeCall::Push(node.to_string(), entry.clone()));
        if inner.unreachable.contains(node) || inner.rejected_buckets.contains(&entry.bucket_name) {
            return Err(unavailable(node));
        }
        let table = inner.tables.entry(node.to_string()).or_default();
        table.retain(|e| e.bucket_name != entry.bucket_name);
        table.push(entry.clone());
        Ok(())
    }

    async fn delete_limit(&self, node: &str, bucket_name: &str) -> EdgeResult<()> {
        let mut inner = self.lock();
        inner
            .calls
            .push(EdgeCall::Delete(node.to_string(), bucket_name.to_string()));
        if inner.unreachable.contains(node) {
            return Err(unavailable(node));
        }
        if let Some(table) = inner.tables.get_mut(node) {
            table.retain(|e| e.bucket_name != bucket_name);
        }
        Ok(())
    }
}
