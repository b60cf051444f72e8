//! Shared, persisted quota table.
//!
//! Wraps the pure [`QuotaMap`] with a reader/writer lock, best-effort
//! persistence and a change signal for the reconcilers. Cloning is cheap;
//! every clone is the same table.

use crate::storage::QuotaStore;
use edge_limit_core::{
    alarm, desired_limits, AlarmDefaults, Observed, QuotaMap, QuotaPair, SetEffect,
};
use edge_limit_types::{BucketQuota, LimitEntry, QuotaKind, QuotaValues};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

/// Authoritative bucket quota table.
#[derive(Clone)]
pub struct QuotaTable {
    inner: Arc<QuotaTableInner>,
}

struct QuotaTableInner {
    map: RwLock<QuotaMap>,
    /// Serializes saves so the file always ends up with the latest table.
    persist: Mutex<()>,
    store: Arc<dyn QuotaStore>,
    /// Bumped on every limit change.
    limits_changed: watch::Sender<u64>,
}

impl std::fmt::Debug for QuotaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTable")
            .field("generation", &*self.inner.limits_changed.borrow())
            .finish_non_exhaustive()
    }
}

impl QuotaTable {
    /// Create an empty table persisted to `store`.
    pub fn new(defaults: AlarmDefaults, store: Arc<dyn QuotaStore>) -> Self {
        let (limits_changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(QuotaTableInner {
                map: RwLock::new(QuotaMap::new(defaults)),
                persist: Mutex::new(()),
                store,
                limits_changed,
            }),
        }
    }

    /// Replace the in-memory table with the persisted one.
    ///
    /// Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize, crate::error::StorageError> {
        let records = self.inner.store.load().await?;
        let count = records.len();
        self.inner.map.write().await.load(records);
        Ok(count)
    }

    /// Effective quota for a bucket (explicit, else default).
    pub async fn get(&self, bucket_name: &str, kind: QuotaKind) -> QuotaValues {
        self.inner.map.read().await.get(bucket_name, kind)
    }

    /// Both explicit slots of a bucket.
    pub async fn pair(&self, bucket_name: &str) -> QuotaPair {
        self.inner.map.read().await.pair(bucket_name)
    }

    /// Global alarm fallback.
    pub async fn defaults(&self) -> AlarmDefaults {
        self.inner.map.read().await.defaults()
    }

    /// Set one quota slot.
    ///
    /// The table is saved afterwards; a failed save is logged and the
    /// in-memory change stands. A limit change wakes every reconciler.
    pub async fn set(&self, bucket_name: &str, kind: QuotaKind, values: QuotaValues) -> SetEffect {
        let effect = self.inner.map.write().await.set(bucket_name, kind, values);
        tracing::info!(
            "Quota {} for {}: {:?} (rate={}, conn={}, qps={}, per_conn_rate={})",
            kind,
            bucket_name,
            effect,
            values.rate,
            values.conn,
            values.qps,
            values.per_conn_rate
        );

        self.persist().await;

        if kind == QuotaKind::Limit {
            self.inner.limits_changed.send_modify(|generation| *generation += 1);
        }
        effect
    }

    async fn persist(&self) {
        let _guard = self.inner.persist.lock().await;
        let records = self.inner.map.read().await.records();
        if let Err(e) = self.inner.store.save(&records).await {
            tracing::error!("Failed to persist quota table: {}", e);
        }
    }

    /// Every explicit slot, ordered by bucket then kind.
    pub async fn records(&self) -> Vec<BucketQuota> {
        self.inner.map.read().await.records()
    }

    /// Every configured limit, undivided.
    pub async fn limits(&self) -> BTreeMap<String, QuotaValues> {
        self.inner.map.read().await.limits()
    }

    /// Rows each of `nodes` edge nodes should hold.
    pub async fn desired_limits(&self, nodes: usize) -> BTreeMap<String, LimitEntry> {
        desired_limits(&self.limits().await, nodes)
    }

    /// Compare `observed` against the bucket's alarm quota.
    ///
    /// Returns the alert text if any dimension is exceeded.
    pub async fn check_alarm(
        &self,
        subject: &str,
        bucket_name: &str,
        observed: &Observed,
    ) -> Option<String> {
        let threshold = self.get(bucket_name, QuotaKind::Alarm).await;
        alarm::check(subject, observed, &threshold)
    }

    /// Subscribe to limit changes. The value is a change counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.limits_changed.subscribe()
    }
}
