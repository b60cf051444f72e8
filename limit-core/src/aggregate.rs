//! Running traffic sums for a bucket within one window.

use edge_limit_types::{BucketReport, QpsBreakdown};
use serde::Serialize;

/// Sums of every figure in the reports folded into one bucket/window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrafficSums {
    /// Sum of expected rates
    pub expected_rate: f64,
    /// Sum of expected connection counts
    pub expected_conn: f64,
    /// Sum of expected QPS
    pub expected_qps: f64,
    /// Sum of expected per-connection rates
    pub expected_conn_rate: f64,
    /// Sum of assigned rates
    pub assigned_rate: f64,
    /// Sum of assigned connection ceilings
    pub assigned_conn: f64,
    /// Sum of assigned QPS ceilings
    pub assigned_qps: f64,
    /// Sum of observed rates
    pub observed_rate: f64,
    /// Sum of observed connection counts
    pub observed_conn: f64,
    /// Sum of observed peak connection counts
    pub observed_conn_peak: f64,
    /// Sum of observed QPS by kind
    pub observed_qps: QpsBreakdown,
}

impl TrafficSums {
    /// Add one report's figures.
    pub fn add_report(&mut self, report: &BucketReport) {
        self.expected_rate += report.expected_rate;
        self.expected_conn += report.expected_conn;
        self.expected_qps += report.expected_qps;
        self.expected_conn_rate += report.expected_conn_rate;
        self.assigned_rate += report.assigned_rate;
        self.assigned_conn += report.assigned_conn;
        self.assigned_qps += report.assigned_qps;
        self.observed_rate += report.observed_rate;
        self.observed_conn += report.observed_conn;
        self.observed_conn_peak += report.observed_conn_peak;
        self.observed_qps.accumulate(&report.observed_qps);
    }
}

/// A bucket's aggregate for one window: the sums plus who contributed.
///
/// Produced both as a running snapshot after each accepted report and as the
/// finalized value when a window slot is flushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketAggregate {
    /// Bucket name
    pub bucket_name: String,
    /// Window timestamp (epoch seconds)
    pub timestamp: i64,
    /// Addresses of the edge nodes that reported, in arrival order
    pub reporters: Vec<String>,
    /// Summed figures
    pub sums: TrafficSums,
}

impl BucketAggregate {
    /// Number of distinct edge nodes folded in.
    pub fn reporter_count(&self) -> usize {
        self.reporters.len()
    }

    /// Reporters formatted for the stat log and the persistence row.
    pub fn servers_label(&self) -> String {
        format!("[{}]", self.reporters.join(" & "))
    }
}
