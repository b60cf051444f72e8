//! The single consumer of the report queue.
//!
//! Owns the [`WindowAggregator`] outright and routes what it produces:
//! running aggregates and fleet totals to the rings, finalized aggregates to
//! the stat log, the statistics store, the rings and the alarm check.

use crate::alert::AlertDispatcher;
use crate::logging::STAT_TARGET;
use crate::quota_table::QuotaTable;
use crate::server::ControlMetrics;
use crate::storage::StatStorage;
use edge_limit_core::alarm::bucket_subject;
use edge_limit_core::{
    BucketAggregate, Observed, Rejection, RingStore, WindowAggregator, TOTAL_BUCKET, TOTAL_SUBJECT,
};
use edge_limit_types::BucketReport;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};

/// Window aggregation plus its side effects.
pub struct Aggregator {
    window: WindowAggregator,
    rings: Arc<RwLock<RingStore>>,
    quotas: QuotaTable,
    stats: Option<Arc<dyn StatStorage>>,
    alerts: AlertDispatcher,
    metrics: Arc<ControlMetrics>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("window", &self.window.timestamps())
            .field("stats", &self.stats.is_some())
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Create an aggregator; `stats` is optional.
    pub fn new(
        rings: Arc<RwLock<RingStore>>,
        quotas: QuotaTable,
        stats: Option<Arc<dyn StatStorage>>,
        alerts: AlertDispatcher,
        metrics: Arc<ControlMetrics>,
    ) -> Self {
        Self {
            window: WindowAggregator::new(),
            rings,
            quotas,
            stats,
            alerts,
            metrics,
        }
    }

    /// The window state.
    pub fn window(&self) -> &WindowAggregator {
        &self.window
    }

    /// Ingest one report observed at `now`.
    ///
    /// Returns the bucket's running aggregate, or why the report was dropped.
    pub async fn ingest_at(
        &mut self,
        report: &BucketReport,
        now: Instant,
    ) -> Result<BucketAggregate, Rejection> {
        let outcome = self.window.ingest(report, now);

        if outcome.reinitialized {
            self.metrics.window_reinits.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "Window initialized around {} ({} aggregates flushed)",
                report.timestamp,
                outcome.flushed.len()
            );
        }
        if outcome.slid {
            self.metrics.window_slides.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Window slid to {:?}", self.window.timestamps());
        }

        for aggregate in &outcome.flushed {
            self.finalize(aggregate).await;
        }

        match &outcome.result {
            Ok(aggregate) => self.accepted(report, aggregate).await,
            Err(rejection) => self.rejected(report, rejection),
        }
        outcome.result
    }

    /// Drain `rx` until every sender is gone, then flush the whole window.
    pub async fn run(mut self, mut rx: mpsc::Receiver<BucketReport>) {
        while let Some(report) = rx.recv().await {
            self.metrics.report_queue_depth.fetch_sub(1, Ordering::Relaxed);
            let _ = self.ingest_at(&report, Instant::now()).await;
        }

        let flushed = self.window.flush_all();
        for aggregate in &flushed {
            self.finalize(aggregate).await;
        }
        tracing::info!("Aggregator stopped, {} aggregates flushed", flushed.len());
    }

    async fn accepted(&self, report: &BucketReport, aggregate: &BucketAggregate) {
        let total = {
            let mut rings = self.rings.write().await;
            rings.update(aggregate);
            rings.update_total(
                aggregate.timestamp,
                report.observed_rate,
                report.observed_conn,
                report.observed_qps.total,
            )
        };
        let Some(total) = total else {
            return;
        };

        if let Some(message) = self
            .quotas
            .check_alarm(TOTAL_SUBJECT, TOTAL_BUCKET, &Observed::total(&total))
            .await
        {
            self.alerts.raise(message);
        }
    }

    fn rejected(&self, report: &BucketReport, rejection: &Rejection) {
        match rejection {
            Rejection::OutsideWindow { .. } | Rejection::TimestampOutOfRange { .. } => {
                self.metrics.reports_out_of_window.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Dropping report for {} from {}: {}",
                    report.bucket_name,
                    report.server_addr,
                    rejection
                );
            }
            Rejection::Duplicate { .. } => {
                self.metrics.reports_duplicate.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Dropping report for {} at {}: {}",
                    report.bucket_name,
                    report.timestamp,
                    rejection
                );
            }
            Rejection::ReporterSetFull { .. } => {
                self.metrics.reports_overflow.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Dropping report for {} from {}: {}",
                    report.bucket_name,
                    report.server_addr,
                    rejection
                );
            }
        }
    }

    async fn finalize(&self, aggregate: &BucketAggregate) {
        self.metrics.aggregates_flushed.fetch_add(1, Ordering::Relaxed);

        let sums = &aggregate.sums;
        tracing::info!(
            target: STAT_TARGET,
            bucket = %aggregate.bucket_name,
            time = aggregate.timestamp,
            servers = %aggregate.servers_label(),
            reporters = aggregate.reporter_count(),
            expected_rate = sums.expected_rate,
            expected_conn = sums.expected_conn,
            expected_qps = sums.expected_qps,
            expected_conn_rate = sums.expected_conn_rate,
            assigned_rate = sums.assigned_rate,
            assigned_conn = sums.assigned_conn,
            assigned_qps = sums.assigned_qps,
            rate = sums.observed_rate,
            conn = sums.observed_conn,
            conn_peak = sums.observed_conn_peak,
            qps_total = sums.observed_qps.total,
            qps_total_failed = sums.observed_qps.total_failed,
            qps_get = sums.observed_qps.get,
            qps_put = sums.observed_qps.put,
            qps_delete = sums.observed_qps.delete,
            qps_list = sums.observed_qps.list,
            qps_image = sums.observed_qps.image,
            qps_video = sums.observed_qps.video,
            "stat"
        );

        self.rings.write().await.update(aggregate);

        if let Some(stats) = &self.stats {
            if let Err(e) = stats.insert(aggregate).await {
                self.metrics
                    .stats_persist_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Failed to persist stat for {} at {}: {}",
                    aggregate.bucket_name,
                    aggregate.timestamp,
                    e
                );
            }
        }

        let subject = bucket_subject(&aggregate.bucket_name);
        if let Some(message) = self
            .quotas
            .check_alarm(&subject, &aggregate.bucket_name, &Observed::bucket(sums))
            .await
        {
            self.alerts.raise(message);
        }
    }
}

/// Spawn [`Aggregator::run`] on its own task.
pub fn spawn_aggregator(
    aggregator: Aggregator,
    rx: mpsc::Receiver<BucketReport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(aggregator.run(rx))
}
