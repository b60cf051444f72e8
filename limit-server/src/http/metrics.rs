//! Prometheus metrics endpoint.

use crate::server::ControlPlane;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(plane): Extension<Arc<ControlPlane>>) -> impl IntoResponse {
    let m = plane.metrics();

    // Gauges
    let edge_nodes = plane.node_count();
    let buckets = plane.rings().read().await.bucket_count();
    let quota_records = plane.quotas().records().await.len();
    let report_queue = m.report_queue_depth.load(Ordering::Relaxed);
    let alert_queue = m.alert_queue_depth.load(Ordering::Relaxed);

    // Counters
    let received = m.reports_received.load(Ordering::Relaxed);
    let malformed = m.reports_malformed.load(Ordering::Relaxed);
    let out_of_window = m.reports_out_of_window.load(Ordering::Relaxed);
    let duplicate = m.reports_duplicate.load(Ordering::Relaxed);
    let overflow = m.reports_overflow.load(Ordering::Relaxed);
    let slides = m.window_slides.load(Ordering::Relaxed);
    let reinits = m.window_reinits.load(Ordering::Relaxed);
    let flushed = m.aggregates_flushed.load(Ordering::Relaxed);
    let persist_failures = m.stats_persist_failures.load(Ordering::Relaxed);
    let cycles = m.reconcile_cycles.load(Ordering::Relaxed);
    let pushes = m.reconcile_pushes.load(Ordering::Relaxed);
    let deletes = m.reconcile_deletes.load(Ordering::Relaxed);
    let reconcile_failures = m.reconcile_failures.load(Ordering::Relaxed);
    let fetch_failures = m.fetch_failures.load(Ordering::Relaxed);
    let alerts_raised = m.alerts_raised.load(Ordering::Relaxed);
    let alerts_dropped = m.alerts_dropped.load(Ordering::Relaxed);
    let alerts_failed = m.alerts_failed.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP edge_limit_info Server information
# TYPE edge_limit_info gauge
edge_limit_info{{version="{version}"}} 1

# HELP edge_limit_edge_nodes Configured edge nodes
# TYPE edge_limit_edge_nodes gauge
edge_limit_edge_nodes {edge_nodes}

# HELP edge_limit_buckets_tracked Buckets with display history
# TYPE edge_limit_buckets_tracked gauge
edge_limit_buckets_tracked {buckets}

# HELP edge_limit_quota_records Explicit quota records
# TYPE edge_limit_quota_records gauge
edge_limit_quota_records {quota_records}

# HELP edge_limit_report_queue_depth Reports waiting for the aggregator
# TYPE edge_limit_report_queue_depth gauge
edge_limit_report_queue_depth {report_queue}

# HELP edge_limit_alert_queue_depth Alerts waiting for dispatch
# TYPE edge_limit_alert_queue_depth gauge
edge_limit_alert_queue_depth {alert_queue}

# HELP edge_limit_reports_received_total Reports decoded
# TYPE edge_limit_reports_received_total counter
edge_limit_reports_received_total {received}

# HELP edge_limit_reports_malformed_total Datagrams that failed to decode
# TYPE edge_limit_reports_malformed_total counter
edge_limit_reports_malformed_total {malformed}

# HELP edge_limit_reports_rejected_total Reports dropped by the window
# TYPE edge_limit_reports_rejected_total counter
edge_limit_reports_rejected_total{{reason="out_of_window"}} {out_of_window}
edge_limit_reports_rejected_total{{reason="duplicate"}} {duplicate}
edge_limit_reports_rejected_total{{reason="reporters_full"}} {overflow}

# HELP edge_limit_window_slides_total Window slides
# TYPE edge_limit_window_slides_total counter
edge_limit_window_slides_total {slides}

# HELP edge_limit_window_reinits_total Window (re)initialisations
# TYPE edge_limit_window_reinits_total counter
edge_limit_window_reinits_total {reinits}

# HELP edge_limit_aggregates_flushed_total Finalized bucket aggregates
# TYPE edge_limit_aggregates_flushed_total counter
edge_limit_aggregates_flushed_total {flushed}

# HELP edge_limit_stats_persist_failures_total Failed statistics inserts
# TYPE edge_limit_stats_persist_failures_total counter
edge_limit_stats_persist_failures_total {persist_failures}

# HELP edge_limit_reconcile_cycles_total Completed reconciliation cycles
# TYPE edge_limit_reconcile_cycles_total counter
edge_limit_reconcile_cycles_total {cycles}

# HELP edge_limit_reconcile_pushes_total Limit rows pushed to edge nodes
# TYPE edge_limit_reconcile_pushes_total counter
edge_limit_reconcile_pushes_total {pushes}

# HELP edge_limit_reconcile_deletes_total Limit rows deleted from edge nodes
# TYPE edge_limit_reconcile_deletes_total counter
edge_limit_reconcile_deletes_total {deletes}

# HELP edge_limit_reconcile_failures_total Failed pushes and deletes
# TYPE edge_limit_reconcile_failures_total counter
edge_limit_reconcile_failures_total {reconcile_failures}

# HELP edge_limit_fetch_failures_total Failed limit table fetches
# TYPE edge_limit_fetch_failures_total counter
edge_limit_fetch_failures_total {fetch_failures}

# HELP edge_limit_alerts_raised_total Alerts queued for dispatch
# TYPE edge_limit_alerts_raised_total counter
edge_limit_alerts_raised_total {alerts_raised}

# HELP edge_limit_alerts_dropped_total Alerts dropped on a full queue
# TYPE edge_limit_alerts_dropped_total counter
edge_limit_alerts_dropped_total {alerts_dropped}

# HELP edge_limit_alerts_failed_total Alerts the dispatcher failed to deliver
# TYPE edge_limit_alerts_failed_total counter
edge_limit_alerts_failed_total {alerts_failed}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
