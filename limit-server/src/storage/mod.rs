//! Persistence for edge-limit.
//!
//! Two independent stores:
//! - [`StatStorage`]: one row per finalized bucket aggregate (SQLite)
//! - [`QuotaStore`]: the administrator quota table (line-oriented JSON file)
//!
//! Both are best-effort from the caller's point of view: a failed write is
//! logged and never rolls back in-memory state.

mod quota_file;
mod sqlite;

pub use quota_file::{FileQuotaStore, MemoryQuotaStore};
pub use sqlite::SqliteStatStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use edge_limit_core::BucketAggregate;
use edge_limit_types::{BucketQuota, QpsBreakdown};

/// A finalized aggregate as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredStat {
    /// Window timestamp (epoch seconds).
    pub stat_time: i64,
    /// Bucket name.
    pub bucket_name: String,
    /// Reporting servers, as `[a & b]`.
    pub servers: String,
    /// Summed observed rate.
    pub rate: f64,
    /// Summed observed connections.
    pub conn: f64,
    /// Summed observed peak connections.
    pub conn_peak: f64,
    /// Summed observed QPS by kind.
    pub qps: QpsBreakdown,
}

/// Trait for statistics storage backends.
#[async_trait]
pub trait StatStorage: Send + Sync {
    /// Store one finalized aggregate.
    async fn insert(&self, aggregate: &BucketAggregate) -> Result<(), StorageError>;

    /// Most recent rows for a bucket, newest first.
    async fn recent(&self, bucket_name: &str, limit: u32) -> Result<Vec<StoredStat>, StorageError>;
}

/// Trait for quota table persistence.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Read every persisted record. Unreadable records are skipped.
    async fn load(&self) -> Result<Vec<BucketQuota>, StorageError>;

    /// Replace the persisted table with `records`.
    async fn save(&self, records: &[BucketQuota]) -> Result<(), StorageError>;
}
