//! Display queries over the history rings.

use super::{epoch_now, ACTIVE_WITHIN_SECS};
use crate::server::ControlPlane;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use edge_limit_core::{RingPoint, TotalPoint, TOTAL_BUCKET};
use edge_limit_types::{QuotaKind, QuotaValues};
use serde::Serialize;
use std::sync::Arc;

/// One active bucket.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSummary {
    /// Bucket name.
    pub name: String,
    /// Timestamp of the newest point.
    pub last_update: i64,
    /// Mean observed rate over the retained points.
    pub average_rate: f64,
    /// Newest point.
    pub latest: Option<RingPoint>,
    /// Effective alarm quota.
    pub alarm: QuotaValues,
    /// Configured limit, if any.
    pub limit: Option<QuotaValues>,
}

/// `GET /buckets` response.
#[derive(Debug, Clone, Serialize)]
pub struct BucketsResponse {
    /// Active buckets, busiest first.
    pub buckets: Vec<BucketSummary>,
    /// Newest fleet-wide total.
    pub total: Option<TotalPoint>,
    /// Effective alarm quota of the fleet total.
    pub total_alarm: QuotaValues,
}

/// List buckets updated in the last five minutes, busiest first.
pub async fn buckets_handler(Extension(plane): Extension<Arc<ControlPlane>>) -> Json<BucketsResponse> {
    let (active, total) = {
        let rings = plane.rings().read().await;
        let active: Vec<_> = rings
            .active_buckets(epoch_now(), ACTIVE_WITHIN_SECS)
            .into_iter()
            .map(|bucket| {
                let latest = rings.latest(&bucket.name).cloned();
                (bucket, latest)
            })
            .collect();
        (active, rings.latest_total().copied())
    };

    let quotas = plane.quotas();
    let mut buckets = Vec::with_capacity(active.len());
    for (bucket, latest) in active {
        buckets.push(BucketSummary {
            alarm: quotas.get(&bucket.name, QuotaKind::Alarm).await,
            limit: quotas.pair(&bucket.name).await.limit,
            name: bucket.name,
            last_update: bucket.last_update,
            average_rate: bucket.average_rate,
            latest,
        });
    }

    Json(BucketsResponse {
        buckets,
        total,
        total_alarm: quotas.get(TOTAL_BUCKET, QuotaKind::Alarm).await,
    })
}

/// Display history of one bucket, oldest first.
pub async fn bucket_history_handler(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<RingPoint>>, StatusCode> {
    plane
        .rings()
        .read()
        .await
        .snapshot(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Fleet-wide history, oldest first.
pub async fn total_history_handler(
    Extension(plane): Extension<Arc<ControlPlane>>,
) -> Json<Vec<TotalPoint>> {
    Json(plane.rings().read().await.total_snapshot())
}
