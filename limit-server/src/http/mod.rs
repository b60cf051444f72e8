//! HTTP endpoints for edge-limit.
//!
//! Health, metrics, the display queries over the history rings and the
//! administrator quota surface. Everything is JSON except `/metrics`.

pub mod health;
mod metrics;
mod quota;
mod stats;

use crate::server::ControlPlane;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;
pub use quota::{QuotaForm, QuotaSetResponse, QuotaView};
pub use stats::{BucketSummary, BucketsResponse};

/// Buckets updated within this many seconds are listed as active.
pub const ACTIVE_WITHIN_SECS: i64 = 300;

/// Build the HTTP router with all endpoints.
pub fn build_router(plane: Arc<ControlPlane>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/buckets", get(stats::buckets_handler))
        .route("/buckets/:name/history", get(stats::bucket_history_handler))
        .route("/total/history", get(stats::total_history_handler))
        .route("/quota", post(quota::set_quota_handler))
        .route("/quota/:name", get(quota::get_quota_handler));

    if plane.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(plane))
}

/// Current wall-clock time in epoch seconds.
fn epoch_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::Config;
    use crate::quota_table::QuotaTable;
    use crate::server::ControlPlane;
    use crate::storage::MemoryQuotaStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use edge_limit_core::AlarmDefaults;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    pub fn test_plane(config: Config) -> Arc<ControlPlane> {
        let quotas = QuotaTable::new(AlarmDefaults::default(), Arc::new(MemoryQuotaStore::new()));
        Arc::new(ControlPlane::new(config, quotas))
    }

    pub async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub async fn post_json(
        app: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::test_support::get;
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_plane(Config::default()));

        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_plane(config));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn epoch_now_is_after_2020() {
        assert!(epoch_now() > 1_577_836_800);
    }
}
