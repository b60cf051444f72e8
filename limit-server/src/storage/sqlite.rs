//! SQLite statistics backend.

use super::{StatStorage, StoredStat};
use crate::error::StorageError;
use async_trait::async_trait;
use edge_limit_core::BucketAggregate;
use edge_limit_types::QpsBreakdown;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based statistics storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStatStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStatStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStatStorage").finish_non_exhaustive()
    }
}

impl SqliteStatStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stat_buckets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stat_time INTEGER NOT NULL,
                bucket_name TEXT NOT NULL,
                servers TEXT NOT NULL,
                rate REAL NOT NULL,
                conn REAL NOT NULL,
                conn_peak REAL NOT NULL,
                qps_total REAL NOT NULL,
                qps_total_failed REAL NOT NULL,
                qps_get REAL NOT NULL,
                qps_put REAL NOT NULL,
                qps_delete REAL NOT NULL,
                qps_list REAL NOT NULL,
                qps_image REAL NOT NULL,
                qps_video REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_stat_buckets_bucket_time ON stat_buckets(bucket_name, stat_time)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Total number of stored rows.
    pub async fn count(&self) -> Result<u64, StorageError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stat_buckets")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

#[async_trait]
impl StatStorage for SqliteStatStorage {
    async fn insert(&self, aggregate: &BucketAggregate) -> Result<(), StorageError> {
        let sums = &aggregate.sums;
        let qps = &sums.observed_qps;

        sqlx::query(
            r#"
            INSERT INTO stat_buckets (
                stat_time, bucket_name, servers, rate, conn, conn_peak,
                qps_total, qps_total_failed, qps_get, qps_put,
                qps_delete, qps_list, qps_image, qps_video
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(aggregate.timestamp)
        .bind(&aggregate.bucket_name)
        .bind(aggregate.servers_label())
        .bind(sums.observed_rate)
        .bind(sums.observed_conn)
        .bind(sums.observed_conn_peak)
        .bind(qps.total)
        .bind(qps.total_failed)
        .bind(qps.get)
        .bind(qps.put)
        .bind(qps.delete)
        .bind(qps.list)
        .bind(qps.image)
        .bind(qps.video)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, bucket_name: &str, limit: u32) -> Result<Vec<StoredStat>, StorageError> {
        let rows = sqlx::query_as::<_, StatRow>(
            r#"
            SELECT stat_time, bucket_name, servers, rate, conn, conn_peak,
                   qps_total, qps_total_failed, qps_get, qps_put,
                   qps_delete, qps_list, qps_image, qps_video
            FROM stat_buckets
            WHERE bucket_name = ?1
            ORDER BY stat_time DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(bucket_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredStat::from).collect())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct StatRow {
    stat_time: i64,
    bucket_name: String,
    servers: String,
    rate: f64,
    conn: f64,
    conn_peak: f64,
    qps_total: f64,
    qps_total_failed: f64,
    qps_get: f64,
    qps_put: f64,
    qps_delete: f64,
    qps_list: f64,
    qps_image: f64,
    qps_video: f64,
}

impl From<StatRow> for StoredStat {
    fn from(row: StatRow) -> Self {
        Self {
            stat_time: row.stat_time,
            bucket_name: row.bucket_name,
            servers: row.servers,
            rate: row.rate,
            conn: row.conn,
            conn_peak: row.conn_peak,
            qps: QpsBreakdown {
                total: row.qps_total,
                total_failed: row.qps_total_failed,
                get: row.qps_get,
                put: row.qps_put,
                delete: row.qps_delete,
                list: row.qps_list,
                image: row.qps_image,
                video: row.qps_video,
            },
        }
    }
}
