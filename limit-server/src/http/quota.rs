//! Administrator quota surface.

use crate::server::ControlPlane;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json};
use edge_limit_core::{QuotaPair, SetEffect, TOTAL_BUCKET};
use edge_limit_types::{QuotaKind, QuotaValues};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `POST /quota` body.
#[derive(Clone, Deserialize)]
pub struct QuotaForm {
    /// Bucket name; empty targets the fleet total.
    #[serde(default)]
    pub bucket: String,
    /// `warn` or `limit`.
    pub kind: String,
    /// Rate ceiling.
    #[serde(default)]
    pub rate: u64,
    /// Connection ceiling.
    #[serde(default)]
    pub connection: u64,
    /// QPS ceiling.
    #[serde(default)]
    pub qps: u64,
    /// Per-connection rate ceiling.
    #[serde(default)]
    pub rate_per_conn: u64,
    /// Administrator name.
    pub admin: String,
    /// Administrator password.
    pub password: String,
}

impl std::fmt::Debug for QuotaForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaForm")
            .field("bucket", &self.bucket)
            .field("kind", &self.kind)
            .field("admin", &self.admin)
            .finish_non_exhaustive()
    }
}

/// `POST /quota` response.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSetResponse {
    /// Bucket the quota was applied to.
    pub bucket: String,
    /// `warn` or `limit`.
    pub kind: &'static str,
    /// `stored` or `cleared`.
    pub effect: &'static str,
}

/// `GET /quota/{name}` response.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaView {
    /// Bucket name.
    pub bucket: String,
    /// Explicit slots.
    pub explicit: QuotaPair,
    /// Alarm quota in force (explicit or default).
    pub alarm: QuotaValues,
    /// Limit in force; all zero means unlimited.
    pub limit: QuotaValues,
}

/// Show a bucket's explicit and effective quotas.
pub async fn get_quota_handler(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Path(name): Path<String>,
) -> Json<QuotaView> {
    let quotas = plane.quotas();
    Json(QuotaView {
        explicit: quotas.pair(&name).await,
        alarm: quotas.get(&name, QuotaKind::Alarm).await,
        limit: quotas.get(&name, QuotaKind::Limit).await,
        bucket: name,
    })
}

/// Set one quota slot.
///
/// An empty bucket name sets the fleet-total alarm, whatever kind was asked.
pub async fn set_quota_handler(
    Extension(plane): Extension<Arc<ControlPlane>>,
    Json(form): Json<QuotaForm>,
) -> Result<Json<QuotaSetResponse>, (StatusCode, String)> {
    if !plane.config().admin.authenticate(&form.admin, &form.password) {
        tracing::warn!("Rejected quota update from {:?}: bad credentials", form.admin);
        return Err((StatusCode::UNAUTHORIZED, "invalid admin credentials".to_string()));
    }

    let kind: QuotaKind = form
        .kind
        .parse()
        .map_err(|e: edge_limit_types::TypesError| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let bucket = form.bucket.trim();
    let (bucket, kind) = if bucket.is_empty() {
        (TOTAL_BUCKET, QuotaKind::Alarm)
    } else {
        (bucket, kind)
    };

    let values = QuotaValues::new(form.rate, form.connection, form.qps, form.rate_per_conn);
    tracing::info!("Quota update by {} for {}", form.admin, bucket);
    let effect = plane.quotas().set(bucket, kind, values).await;

    Ok(Json(QuotaSetResponse {
        bucket: bucket.to_string(),
        kind: kind.as_str(),
        effect: match effect {
            SetEffect::Stored => "stored",
            SetEffect::Cleared => "cleared",
        },
    }))
}
