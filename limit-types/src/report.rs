//! Traffic reports sent by edge nodes.
//!
//! Each edge node sends one JSON datagram per bucket per reporting interval.
//! Every numeric field is optional on the wire and defaults to zero; the
//! reporting address is never trusted from the payload and is filled in by
//! the receiver from the datagram source.

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Observed QPS broken down by operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QpsBreakdown {
    /// All requests
    #[serde(rename = "qps_total")]
    pub total: f64,
    /// Failed requests
    #[serde(rename = "qps_total_failed")]
    pub total_failed: f64,
    /// GET requests
    #[serde(rename = "qps_get")]
    pub get: f64,
    /// PUT requests
    #[serde(rename = "qps_put")]
    pub put: f64,
    /// DELETE requests
    #[serde(rename = "qps_delete")]
    pub delete: f64,
    /// LIST requests
    #[serde(rename = "qps_list")]
    pub list: f64,
    /// Image-processing requests
    #[serde(rename = "qps_image")]
    pub image: f64,
    /// Video-processing requests
    #[serde(rename = "qps_video")]
    pub video: f64,
}

impl QpsBreakdown {
    /// Add every kind of `other` into `self`.
    pub fn accumulate(&mut self, other: &QpsBreakdown) {
        self.total += other.total;
        self.total_failed += other.total_failed;
        self.get += other.get;
        self.put += other.put;
        self.delete += other.delete;
        self.list += other.list;
        self.image += other.image;
        self.video += other.video;
    }
}

/// One edge node's statistics for one bucket in one reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketReport {
    /// Bucket the figures belong to
    pub bucket_name: String,
    /// Window timestamp (epoch seconds, quantized by the edge node)
    #[serde(rename = "time_stamp")]
    pub timestamp: i64,
    /// Address of the reporting edge node (set by the receiver)
    #[serde(default)]
    pub server_addr: String,

    /// Rate the node expected to serve
    #[serde(rename = "expected_bucket_rate", default)]
    pub expected_rate: f64,
    /// Connections the node expected to serve
    #[serde(rename = "expected_bucket_conn", default)]
    pub expected_conn: f64,
    /// QPS the node expected to serve
    #[serde(rename = "expected_bucket_qps", default)]
    pub expected_qps: f64,
    /// Per-connection rate the node expected to serve
    #[serde(rename = "expected_conn_rate", default)]
    pub expected_conn_rate: f64,

    /// Rate ceiling currently assigned on the node
    #[serde(rename = "assigned_bucket_rate", default)]
    pub assigned_rate: f64,
    /// Connection ceiling currently assigned on the node
    #[serde(rename = "assigned_bucket_conn", default)]
    pub assigned_conn: f64,
    /// QPS ceiling currently assigned on the node
    #[serde(rename = "assigned_bucket_qps", default)]
    pub assigned_qps: f64,

    /// Observed rate (bytes per second)
    #[serde(rename = "statistic_bucket_rate", default)]
    pub observed_rate: f64,
    /// Observed connection count
    #[serde(rename = "statistic_bucket_conn", default)]
    pub observed_conn: f64,
    /// Observed peak connection count
    #[serde(rename = "statistic_bucket_conn_max", default)]
    pub observed_conn_peak: f64,
    /// Observed QPS by operation kind
    #[serde(rename = "statistic_bucket_qps", default)]
    pub observed_qps: QpsBreakdown,
}

impl BucketReport {
    /// Decode a report from a JSON datagram.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TypesError> {
        let report: BucketReport = serde_json::from_slice(bytes)?;
        if report.bucket_name.is_empty() {
            return Err(TypesError::EmptyBucket);
        }
        Ok(report)
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }
}
