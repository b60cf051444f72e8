//! Reconciliation planning: what to push to and delete from one edge node.
//!
//! Every node gets an equal floor share of each configured limit. The
//! integer remainder is not redistributed, so the fleet total may fall a
//! few units short of the configured quota.

use std::collections::BTreeMap;

use edge_limit_types::{LimitEntry, QuotaValues};

/// One node's share of a fleet-wide limit.
///
/// Rate, connections and QPS are floor-divided by `nodes`. The per-connection
/// rate limits a single connection and is passed through undivided.
pub fn per_node_share(values: &QuotaValues, nodes: usize) -> QuotaValues {
    let n = nodes.max(1) as u64;
    QuotaValues {
        rate: values.rate / n,
        conn: values.conn / n,
        qps: values.qps / n,
        per_conn_rate: values.per_conn_rate,
    }
}

/// Desired table rows for one node, keyed by bucket.
pub fn desired_limits(
    limits: &BTreeMap<String, QuotaValues>,
    nodes: usize,
) -> BTreeMap<String, LimitEntry> {
    limits
        .iter()
        .map(|(name, values)| {
            (
                name.clone(),
                LimitEntry::new(name.clone(), per_node_share(values, nodes)),
            )
        })
        .collect()
}

/// Calls needed to converge one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Rows to create or update, ordered by bucket
    pub push: Vec<LimitEntry>,
    /// Buckets to remove from the node
    pub delete: Vec<String>,
    /// Buckets already correct on the node
    pub in_sync: Vec<String>,
}

impl ReconcilePlan {
    /// True when the node needs no calls.
    pub fn is_empty(&self) -> bool {
        self.push.is_empty() && self.delete.is_empty()
    }
}

/// Diff a node's applied table against the desired rows.
pub fn plan(desired: &BTreeMap<String, LimitEntry>, applied: &[LimitEntry]) -> ReconcilePlan {
    let mut pending = desired.clone();
    let mut result = ReconcilePlan::default();

    for entry in applied {
        match desired.get(&entry.bucket_name) {
            Some(want) if want == entry => {
                if pending.remove(&entry.bucket_name).is_some() {
                    result.in_sync.push(entry.bucket_name.clone());
                }
            }
            // wrong values: stays pending and is pushed
            Some(_) => {}
            None => {
                if !result.delete.contains(&entry.bucket_name) {
                    result.delete.push(entry.bucket_name.clone());
                }
            }
        }
    }

    result.push = pending.into_values().collect();
    result
}
