//! Alarm threshold check.

use std::fmt::Write;

use edge_limit_types::QuotaValues;

use crate::aggregate::TrafficSums;
use crate::ring::TotalPoint;

/// Subject line used for the fleet-wide total.
pub const TOTAL_SUBJECT: &str = "Fleet total";

/// The figures compared against an alarm quota.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observed {
    /// Observed rate
    pub rate: f64,
    /// Connection figure (peak for buckets, running count for the total)
    pub conn: f64,
    /// Total QPS
    pub qps: f64,
}

impl Observed {
    /// Figures of a finalized bucket aggregate.
    pub fn bucket(sums: &TrafficSums) -> Self {
        Self {
            rate: sums.observed_rate,
            conn: sums.observed_conn_peak,
            qps: sums.observed_qps.total,
        }
    }

    /// Figures of a running fleet total.
    pub fn total(point: &TotalPoint) -> Self {
        Self {
            rate: point.rate,
            conn: point.conn,
            qps: point.qps_total,
        }
    }
}

/// Dimension of a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Bucket rate
    Rate,
    /// Connections
    Connection,
    /// Requests per second
    Qps,
}

impl Dimension {
    fn label(&self) -> &'static str {
        match self {
            Dimension::Rate => "Rate",
            Dimension::Connection => "Connection",
            Dimension::Qps => "QPS",
        }
    }
}

/// One dimension over its threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exceeded {
    /// Which dimension
    pub dimension: Dimension,
    /// Observed value
    pub current: f64,
    /// Threshold it exceeded
    pub quota: u64,
}

/// Dimensions of `observed` strictly above `threshold`. A zero threshold
/// disables its dimension.
pub fn exceeded(observed: &Observed, threshold: &QuotaValues) -> Vec<Exceeded> {
    [
        (Dimension::Rate, observed.rate, threshold.rate),
        (Dimension::Connection, observed.conn, threshold.conn),
        (Dimension::Qps, observed.qps, threshold.qps),
    ]
    .into_iter()
    .filter(|&(_, current, quota)| quota != 0 && current > quota as f64)
    .map(|(dimension, current, quota)| Exceeded {
        dimension,
        current,
        quota,
    })
    .collect()
}

/// Composite alert text for `subject`, or `None` if nothing is exceeded.
pub fn check(subject: &str, observed: &Observed, threshold: &QuotaValues) -> Option<String> {
    let over = exceeded(observed, threshold);
    if over.is_empty() {
        return None;
    }
    let mut message = subject.to_string();
    for e in &over {
        let _ = write!(
            message,
            " {} exceeds Quota, Current<{:.1}>, Quota<{}>",
            e.dimension.label(),
            e.current,
            e.quota
        );
    }
    Some(message)
}

/// Alert subject for a bucket.
pub fn bucket_subject(bucket_name: &str) -> String {
    format!("Bucket: {bucket_name}")
}
