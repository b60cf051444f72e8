//! Control plane coordination.
//!
//! [`ControlPlane`] holds the state shared between the aggregator, the
//! reconcilers and the HTTP endpoints. [`serve`] wires every task together
//! and runs until the shutdown signal flips.

use crate::aggregator::{spawn_aggregator, Aggregator};
use crate::alert::{spawn_alert_task, AlertDispatcher, AlertSink, HttpAlertSink, LogAlertSink};
use crate::config::{AlertConfig, Config};
use crate::edge::{EdgeClient, HttpEdgeClient};
use crate::error::Result;
use crate::ingest::spawn_ingest;
use crate::quota_table::QuotaTable;
use crate::reconciler::{spawn_reconciler, NodeReconciler};
use crate::storage::{FileQuotaStore, SqliteStatStorage, StatStorage};
use edge_limit_core::RingStore;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};

/// Operational metrics for monitoring control plane activity.
///
/// Counters are monotonically increasing (reset only on restart); the
/// `*_queue_depth` fields are gauges.
#[derive(Debug, Default)]
pub struct ControlMetrics {
    /// Datagrams decoded into reports.
    pub reports_received: AtomicU64,
    /// Datagrams that failed to decode.
    pub reports_malformed: AtomicU64,
    /// Reports outside the live window.
    pub reports_out_of_window: AtomicU64,
    /// Repeat reports from the same server for the same bucket and window.
    pub reports_duplicate: AtomicU64,
    /// Reports refused because the bucket's reporter set was full.
    pub reports_overflow: AtomicU64,
    /// Window slides.
    pub window_slides: AtomicU64,
    /// Window (re)initialisations.
    pub window_reinits: AtomicU64,
    /// Finalized bucket aggregates.
    pub aggregates_flushed: AtomicU64,
    /// Failed statistics inserts.
    pub stats_persist_failures: AtomicU64,
    /// Completed reconciliation cycles.
    pub reconcile_cycles: AtomicU64,
    /// Limit rows pushed to edge nodes.
    pub reconcile_pushes: AtomicU64,
    /// Limit rows deleted from edge nodes.
    pub reconcile_deletes: AtomicU64,
    /// Failed pushes and deletes.
    pub reconcile_failures: AtomicU64,
    /// Failed limit table fetches.
    pub fetch_failures: AtomicU64,
    /// Alerts queued for dispatch.
    pub alerts_raised: AtomicU64,
    /// Alerts dropped because the queue was full or closed.
    pub alerts_dropped: AtomicU64,
    /// Alerts the sink failed to deliver.
    pub alerts_failed: AtomicU64,
    /// Reports waiting for the aggregator.
    pub report_queue_depth: AtomicU64,
    /// Alerts waiting for dispatch.
    pub alert_queue_depth: AtomicU64,
}

/// State shared across the control plane.
pub struct ControlPlane {
    config: Config,
    metrics: Arc<ControlMetrics>,
    rings: Arc<RwLock<RingStore>>,
    quotas: QuotaTable,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("quotas", &self.quotas)
            .finish_non_exhaustive()
    }
}

impl ControlPlane {
    /// Create the shared state around an existing quota table.
    pub fn new(config: Config, quotas: QuotaTable) -> Self {
        Self {
            config,
            metrics: Arc::new(ControlMetrics::default()),
            rings: Arc::new(RwLock::new(RingStore::new())),
            quotas,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &ControlMetrics {
        &self.metrics
    }

    /// Get a clone of the metrics Arc for background tasks.
    pub fn metrics_arc(&self) -> Arc<ControlMetrics> {
        self.metrics.clone()
    }

    /// Display history, shared with the aggregator.
    pub fn rings(&self) -> &Arc<RwLock<RingStore>> {
        &self.rings
    }

    /// The quota table.
    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    /// Number of configured edge nodes.
    pub fn node_count(&self) -> usize {
        self.config.edge.nodes.len()
    }
}

/// Run the control plane until `shutdown` becomes `true`.
///
/// Startup order: quota table, alert task, aggregator, reconcilers, UDP
/// receivers, HTTP server. On shutdown the receivers stop first so the
/// aggregator can drain its queue and flush the window before exiting.
pub async fn serve(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    crate::http::health::init_start_time();

    let quota_store = Arc::new(FileQuotaStore::new(&config.storage.quota_file));
    let quotas = QuotaTable::new(config.alarm, quota_store);
    match quotas.load().await {
        Ok(n) => tracing::info!("Loaded {} quota records", n),
        Err(e) => tracing::error!("Failed to load quota table: {}", e),
    }

    let plane = Arc::new(ControlPlane::new(config.clone(), quotas.clone()));
    let metrics = plane.metrics_arc();

    // Alerts
    let sink = alert_sink(&config.alert);
    let (alerts, alert_rx) = AlertDispatcher::channel(config.alert.queue_capacity, metrics.clone());
    let alert_task = spawn_alert_task(alert_rx, sink, metrics.clone());

    // Aggregation
    let stats = open_stats(config.storage.stats_database.as_deref()).await;
    let (report_tx, report_rx) = mpsc::channel(config.ingest.queue_capacity.max(1));
    let aggregator = Aggregator::new(
        plane.rings().clone(),
        quotas.clone(),
        stats,
        alerts.clone(),
        metrics.clone(),
    );
    let aggregator_task = spawn_aggregator(aggregator, report_rx);

    // Reconciliation
    let edge: Arc<dyn EdgeClient> = Arc::new(HttpEdgeClient::new(edge_timeout(
        config.edge.request_timeout_secs,
    ))?);
    let poll = Duration::from_secs(config.edge.poll_interval_secs.max(1));
    let mut reconcilers = Vec::new();
    for node in &config.edge.nodes {
        let reconciler = NodeReconciler::new(
            node.clone(),
            config.edge.nodes.len(),
            edge.clone(),
            quotas.clone(),
            alerts.clone(),
            metrics.clone(),
            config.edge.fetch_failure_alert_threshold,
        );
        reconcilers.push(spawn_reconciler(
            reconciler,
            poll,
            quotas.subscribe(),
            shutdown.clone(),
        ));
    }
    tracing::info!("Reconciling {} edge nodes every {:?}", reconcilers.len(), poll);

    // Ingest
    let mut receivers = Vec::new();
    for addr in &config.ingest.bind_addresses {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!("Receiving reports on udp://{}", socket.local_addr()?);
        receivers.push(spawn_ingest(
            socket,
            report_tx.clone(),
            metrics.clone(),
            config.ingest.max_datagram_size,
            shutdown.clone(),
        ));
    }
    drop(report_tx);

    // HTTP
    let listener = tokio::net::TcpListener::bind(&config.http.bind_address).await?;
    tracing::info!("HTTP listening on http://{}", listener.local_addr()?);
    let app = crate::http::build_router(plane.clone());
    let mut http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        let signal = async move {
            while !*http_shutdown.borrow_and_update() {
                if http_shutdown.changed().await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    for task in receivers {
        let _ = task.await;
    }
    tracing::info!("Report receivers stopped, draining aggregator");
    let _ = aggregator_task.await;
    for task in reconcilers {
        let _ = task.await;
    }
    let _ = http_task.await;

    drop(alerts);
    let _ = alert_task.await;

    tracing::info!("Control plane stopped");
    Ok(())
}

/// HTTP alert sink when enabled, falling back to the log on build failure.
fn alert_sink(config: &AlertConfig) -> Arc<dyn AlertSink> {
    if !config.enabled {
        return Arc::new(LogAlertSink);
    }
    match HttpAlertSink::new(config) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::error!("Failed to build alert sink, alerts will only be logged: {}", e);
            Arc::new(LogAlertSink)
        }
    }
}

/// Open the statistics database; `None` if unconfigured or unavailable.
async fn open_stats(path: Option<&Path>) -> Option<Arc<dyn StatStorage>> {
    let path = path?;
    match SqliteStatStorage::new(path).await {
        Ok(storage) => {
            tracing::info!("Persisting statistics to {}", path.display());
            Some(Arc::new(storage))
        }
        Err(e) => {
            tracing::error!(
                "Failed to open statistics database {}, statistics will not be persisted: {}",
                path.display(),
                e
            );
            None
        }
    }
}

fn edge_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryQuotaStore;
    use edge_limit_core::AlarmDefaults;
    use std::sync::atomic::Ordering;

    fn test_plane(nodes: &[&str]) -> ControlPlane {
        let mut config = Config::default();
        config.edge.nodes = nodes.iter().map(|n| n.to_string()).collect();
        let quotas = QuotaTable::new(AlarmDefaults::default(), Arc::new(MemoryQuotaStore::new()));
        ControlPlane::new(config, quotas)
    }

    #[test]
    fn node_count_follows_config() {
        assert_eq!(test_plane(&[]).node_count(), 0);
        assert_eq!(test_plane(&["a:1", "b:1"]).node_count(), 2);
    }

    #[test]
    fn metrics_arc_is_shared() {
        let plane = test_plane(&[]);
        plane
            .metrics_arc()
            .reports_received
            .fetch_add(3, Ordering::Relaxed);
        assert_eq!(plane.metrics().reports_received.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn zero_edge_timeout_is_clamped() {
        assert_eq!(edge_timeout(0), Duration::from_secs(1));
        assert_eq!(edge_timeout(5), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stats_database_is_optional_and_best_effort() {
        let dir = tempfile::tempdir().unwrap();

        let unreachable = dir.path().join("missing/dir/stats.db");
        let usable = dir.path().join("stats.db");

        assert!(open_stats(None).await.is_none());
        assert!(open_stats(Some(unreachable.as_path())).await.is_none());
        assert!(open_stats(Some(usable.as_path())).await.is_some());
    }

    #[tokio::test]
    async fn serve_runs_without_stats_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ingest.bind_addresses = vec!["127.0.0.1:0".into()];
        config.http.bind_address = "127.0.0.1:0".into();
        config.storage.quota_file = dir.path().join("quota");
        config.storage.stats_database = Some(dir.path().join("missing/dir/stats.db"));
        config.alert.enabled = true;
        config.edge.request_timeout_secs = 0;

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(serve(config, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!running.is_finished());
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("serve should stop after shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ingest.bind_addresses = vec!["127.0.0.1:0".into()];
        config.http.bind_address = "127.0.0.1:0".into();
        config.storage.quota_file = dir.path().join("quota");

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(serve(config, rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("serve should stop after shutdown")
            .unwrap()
            .unwrap();
    }
}
