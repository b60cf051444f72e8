//! Health check endpoint.

use crate::server::ControlPlane;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of configured edge nodes.
    pub edge_nodes: usize,
    /// Number of buckets with display history.
    pub buckets_tracked: usize,
    /// Number of explicit quota records.
    pub quota_records: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(plane): Extension<Arc<ControlPlane>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        edge_nodes: plane.node_count(),
        buckets_tracked: plane.rings().read().await.bucket_count(),
        quota_records: plane.quotas().records().await.len(),
        uptime_seconds: uptime,
    })
}
