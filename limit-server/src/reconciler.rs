//! Per-node limit reconciliation.
//!
//! Each edge node gets its own [`NodeReconciler`] on its own task. A cycle
//! fetches the node's applied table, diffs it against the desired per-node
//! share and issues the pushes and deletes needed to converge. Nodes never
//! coordinate with each other.

use crate::alert::AlertDispatcher;
use crate::edge::EdgeClient;
use crate::quota_table::QuotaTable;
use crate::server::ControlMetrics;
use edge_limit_core::reconcile::plan;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether the applied table was fetched.
    pub fetched: bool,
    /// Rows pushed successfully.
    pub pushed: usize,
    /// Rows deleted successfully.
    pub deleted: usize,
    /// Pushes and deletes that failed.
    pub failed: usize,
    /// Rows already correct on the node.
    pub in_sync: usize,
}

/// Reconciliation state for one edge node.
pub struct NodeReconciler {
    node: String,
    node_count: usize,
    client: Arc<dyn EdgeClient>,
    quotas: QuotaTable,
    alerts: AlertDispatcher,
    metrics: Arc<ControlMetrics>,
    failure_threshold: u32,
    consecutive_failures: u32,
}

impl std::fmt::Debug for NodeReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeReconciler")
            .field("node", &self.node)
            .field("node_count", &self.node_count)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl NodeReconciler {
    /// Create a reconciler for `node`, one of `node_count` edge nodes.
    ///
    /// A `failure_threshold` of zero never alerts on fetch failures.
    pub fn new(
        node: String,
        node_count: usize,
        client: Arc<dyn EdgeClient>,
        quotas: QuotaTable,
        alerts: AlertDispatcher,
        metrics: Arc<ControlMetrics>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            node,
            node_count,
            client,
            quotas,
            alerts,
            metrics,
            failure_threshold,
            consecutive_failures: 0,
        }
    }

    /// The node this reconciler converges.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Fetch failures since the last successful fetch.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one reconciliation cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let applied = match self.client.fetch_limits(&self.node).await {
            Ok(applied) => applied,
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Fetching limits from {} failed ({} in a row): {}",
                    self.node,
                    self.consecutive_failures,
                    e
                );
                if self.failure_threshold > 0 && self.consecutive_failures >= self.failure_threshold {
                    self.alerts.raise(format!(
                        "Edge node {} unreachable: {} consecutive limit fetches failed, last error: {}",
                        self.node, self.consecutive_failures, e
                    ));
                }
                return report;
            }
        };

        if self.consecutive_failures > 0 {
            tracing::info!(
                "Edge node {} reachable again after {} failed fetches",
                self.node,
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        report.fetched = true;

        let desired = self.quotas.desired_limits(self.node_count).await;
        let plan = plan(&desired, &applied);
        report.in_sync = plan.in_sync.len();

        for bucket in &plan.delete {
            match self.client.delete_limit(&self.node, bucket).await {
                Ok(()) => {
                    report.deleted += 1;
                    self.metrics.reconcile_deletes.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Deleted limit for {} on {}", bucket, self.node);
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.reconcile_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Deleting limit for {} on {} failed: {}", bucket, self.node, e);
                    self.alerts.raise(format!(
                        "Edge node {}: deleting limit for {} failed: {}",
                        self.node, bucket, e
                    ));
                }
            }
        }

        for entry in &plan.push {
            match self.client.push_limit(&self.node, entry).await {
                Ok(()) => {
                    report.pushed += 1;
                    self.metrics.reconcile_pushes.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        "Pushed limit for {} to {} (rate={}, conn={}, qps={}, conn_rate={})",
                        entry.bucket_name,
                        self.node,
                        entry.rate,
                        entry.conn,
                        entry.qps,
                        entry.per_conn_rate
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.reconcile_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        "Pushing limit for {} to {} failed: {}",
                        entry.bucket_name,
                        self.node,
                        e
                    );
                    self.alerts.raise(format!(
                        "Edge node {}: pushing limit for {} failed: {}",
                        self.node, entry.bucket_name, e
                    ));
                }
            }
        }

        self.metrics.reconcile_cycles.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Reconciled {}: {} in sync, {} pushed, {} deleted, {} failed",
            self.node,
            report.in_sync,
            report.pushed,
            report.deleted,
            report.failed
        );
        report
    }
}

/// Spawn the control loop for one node.
///
/// Runs a cycle immediately, then every `period`, and out of cycle whenever
/// `limits_changed` ticks. Exits once `shutdown` becomes `true`; a cycle in
/// progress always completes first.
pub fn spawn_reconciler(
    mut reconciler: NodeReconciler,
    period: Duration,
    mut limits_changed: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching_limits = true;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = limits_changed.changed(), if watching_limits => {
                    if changed.is_err() {
                        watching_limits = false;
                        continue;
                    }
                    tracing::debug!("Limits changed, reconciling {} early", reconciler.node());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            reconciler.run_cycle().await;
        }

        tracing::info!("Reconciler for {} stopped", reconciler.node());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{EdgeCall, MockEdgeClient};
    use crate::storage::MemoryQuotaStore;
    use edge_limit_core::AlarmDefaults;
    use edge_limit_types::{LimitEntry, QuotaKind, QuotaValues};
    use tokio::sync::mpsc;

    struct Harness {
        client: MockEdgeClient,
        quotas: QuotaTable,
        alerts: mpsc::Receiver<String>,
        dispatcher: AlertDispatcher,
        metrics: Arc<ControlMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            let metrics = Arc::new(ControlMetrics::default());
            let (dispatcher, alerts) = AlertDispatcher::channel(64, metrics.clone());
            Self {
                client: MockEdgeClient::new(),
                quotas: QuotaTable::new(AlarmDefaults::default(), Arc::new(MemoryQuotaStore::new())),
                alerts,
                dispatcher,
                metrics,
            }
        }

        fn reconciler(&self, node: &str, node_count: usize, threshold: u32) -> NodeReconciler {
            NodeReconciler::new(
                node.to_string(),
                node_count,
                Arc::new(self.client.clone()),
                self.quotas.clone(),
                self.dispatcher.clone(),
                self.metrics.clone(),
                threshold,
            )
        }

        fn drain_alerts(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(message) = self.alerts.try_recv() {
                out.push(message);
            }
            out
        }
    }

    fn share(name: &str, rate: u64, conn: u64, qps: u64) -> LimitEntry {
        LimitEntry::new(name, QuotaValues::new(rate, conn, qps, 0))
    }

    #[tokio::test]
    async fn two_node_fleet_converges_on_half_shares() {
        let h = Harness::new();
        h.quotas
            .set("images", QuotaKind::Limit, QuotaValues::new(1000, 10, 100, 0))
            .await;
        h.client.set_table("a:80", vec![share("images", 500, 5, 50)]);

        let a = h.reconciler("a:80", 2, 0).run_cycle().await;
        let b = h.reconciler("b:80", 2, 0).run_cycle().await;

        assert_eq!(a.in_sync, 1);
        assert_eq!(a.pushed, 0);
        assert_eq!(b.pushed, 1);
        assert_eq!(
            h.client.calls(),
            vec![
                EdgeCall::Fetch("a:80".into()),
                EdgeCall::Fetch("b:80".into()),
                EdgeCall::Push("b:80".into(), share("images", 500, 5, 50)),
            ]
        );
    }

    #[tokio::test]
    async fn stray_rows_are_deleted_and_wrong_rows_repushed() {
        let h = Harness::new();
        h.quotas
            .set("images", QuotaKind::Limit, QuotaValues::new(900, 9, 90, 7))
            .await;
        h.client.set_table(
            "a:80",
            vec![share("images", 1, 1, 1), share("stray", 10, 1, 1)],
        );

        let report = h.reconciler("a:80", 3, 0).run_cycle().await;

        assert_eq!(report.deleted, 1);
        assert_eq!(report.pushed, 1);
        assert_eq!(
            h.client.table("a:80"),
            vec![LimitEntry::new("images", QuotaValues::new(300, 3, 30, 7))]
        );
        assert_eq!(h.metrics.reconcile_pushes.load(Ordering::Relaxed), 1);
        assert_eq!(h.metrics.reconcile_deletes.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn converged_node_needs_no_calls_on_second_cycle() {
        let h = Harness::new();
        h.quotas
            .set("images", QuotaKind::Limit, QuotaValues::new(1000, 10, 100, 0))
            .await;
        let mut rec = h.reconciler("a:80", 1, 0);

        rec.run_cycle().await;
        h.client.take_calls();
        let second = rec.run_cycle().await;

        assert_eq!(second.in_sync, 1);
        assert_eq!(h.client.calls(), vec![EdgeCall::Fetch("a:80".into())]);
    }

    #[tokio::test]
    async fn push_failure_alerts_and_continues() {
        let mut h = Harness::new();
        for name in ["a", "b", "c"] {
            h.quotas
                .set(name, QuotaKind::Limit, QuotaValues::new(10, 1, 1, 0))
                .await;
        }
        h.client.reject_bucket("b");

        let report = h.reconciler("n:80", 1, 0).run_cycle().await;

        assert_eq!(report.pushed, 2);
        assert_eq!(report.failed, 1);
        let alerts = h.drain_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("pushing limit for b failed"));
        assert_eq!(h.metrics.reconcile_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn fetch_failures_alert_from_threshold_on_and_reset_on_recovery() {
        let mut h = Harness::new();
        h.client.fail_node("a:80");
        let mut rec = h.reconciler("a:80", 1, 2);

        let first = rec.run_cycle().await;
        assert!(!first.fetched);
        assert!(h.drain_alerts().is_empty());

        rec.run_cycle().await;
        assert_eq!(h.drain_alerts().len(), 1);

        rec.run_cycle().await;
        let repeated = h.drain_alerts();
        assert_eq!(repeated.len(), 1);
        assert!(repeated[0].contains("3 consecutive"));
        assert_eq!(rec.consecutive_failures(), 3);

        h.client.recover_node("a:80");
        assert!(rec.run_cycle().await.fetched);
        assert_eq!(rec.consecutive_failures(), 0);
        assert_eq!(h.metrics.fetch_failures.load(Ordering::Relaxed), 3);

        h.client.fail_node("a:80");
        rec.run_cycle().await;
        assert!(h.drain_alerts().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_touches_nothing() {
        let h = Harness::new();
        h.quotas
            .set("images", QuotaKind::Limit, QuotaValues::new(1000, 10, 100, 0))
            .await;
        h.client.fail_node("a:80");

        h.reconciler("a:80", 1, 0).run_cycle().await;

        assert_eq!(h.client.calls(), vec![EdgeCall::Fetch("a:80".into())]);
    }

    #[tokio::test]
    async fn limit_change_triggers_immediate_cycle_and_shutdown_stops_loop() {
        let h = Harness::new();
        let (stop, shutdown) = watch::channel(false);
        let task = spawn_reconciler(
            h.reconciler("a:80", 1, 0),
            Duration::from_secs(3600),
            h.quotas.subscribe(),
            shutdown,
        );

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.client.take_calls(), vec![EdgeCall::Fetch("a:80".into())]);

        h.quotas
            .set("images", QuotaKind::Limit, QuotaValues::new(1000, 10, 100, 0))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.client.table("a:80"),
            vec![LimitEntry::new("images", QuotaValues::new(1000, 10, 100, 0))]
        );

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
