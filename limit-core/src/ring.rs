//! Fixed-capacity display history.
//!
//! One ring per bucket plus one fleet-wide total ring, each kept in timestamp
//! order. A write for a timestamp already held overwrites that point; any
//! other write is inserted at its sorted position and evicts the oldest point
//! once the ring is full. A point older than everything in a full ring is
//! dropped.
//!
//! The store has no lock of its own; the server shares it behind a single
//! reader/writer lock.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::aggregate::{BucketAggregate, TrafficSums};

/// Points retained per ring (10 minutes at 5 s spacing).
pub const RING_CAPACITY: usize = 120;

trait Timestamped {
    fn timestamp(&self) -> i64;
}

#[derive(Debug, Clone)]
struct Ring<T> {
    points: VecDeque<T>,
}

impl<T: Timestamped + Clone> Ring<T> {
    fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    fn insert_sorted(&mut self, point: T) -> Option<&mut T> {
        let mut idx = self
            .points
            .partition_point(|p| p.timestamp() < point.timestamp());
        if self.points.len() == RING_CAPACITY {
            if idx == 0 {
                return None;
            }
            self.points.pop_front();
            idx -= 1;
        }
        self.points.insert(idx, point);
        Some(&mut self.points[idx])
    }

    /// Point at `timestamp`, created by `fresh` if not held. Recent points
    /// are checked first. `None` if the point is too old to keep.
    fn upsert_with(&mut self, timestamp: i64, fresh: impl FnOnce() -> T) -> Option<&mut T> {
        match self.points.iter().rposition(|p| p.timestamp() == timestamp) {
            Some(idx) => Some(&mut self.points[idx]),
            None => self.insert_sorted(fresh()),
        }
    }

    fn snapshot(&self) -> Vec<T> {
        self.points.iter().cloned().collect()
    }

    fn latest(&self) -> Option<&T> {
        self.points.back()
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// One bucket's figures at one window timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RingPoint {
    /// Window timestamp (epoch seconds)
    pub timestamp: i64,
    /// Distinct reporters folded in
    pub reporters: usize,
    /// Summed figures
    pub sums: TrafficSums,
}

impl Timestamped for RingPoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl From<&BucketAggregate> for RingPoint {
    fn from(agg: &BucketAggregate) -> Self {
        Self {
            timestamp: agg.timestamp,
            reporters: agg.reporter_count(),
            sums: agg.sums,
        }
    }
}

/// Fleet-wide running totals at one window timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TotalPoint {
    /// Window timestamp (epoch seconds)
    pub timestamp: i64,
    /// Summed observed rate
    pub rate: f64,
    /// Summed observed connections
    pub conn: f64,
    /// Summed total QPS
    pub qps_total: f64,
}

impl Timestamped for TotalPoint {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Summary of a recently updated bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveBucket {
    /// Bucket name
    pub name: String,
    /// Timestamp of the newest point
    pub last_update: i64,
    /// Mean observed rate over the retained points
    pub average_rate: f64,
}

/// Per-bucket and fleet-wide history rings.
#[derive(Debug, Clone)]
pub struct RingStore {
    buckets: HashMap<String, Ring<RingPoint>>,
    total: Ring<TotalPoint>,
}

impl Default for RingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            total: Ring::new(),
        }
    }

    /// Record a bucket aggregate, overwriting any point at the same timestamp.
    pub fn update(&mut self, aggregate: &BucketAggregate) {
        let point = RingPoint::from(aggregate);
        let ring = self
            .buckets
            .entry(aggregate.bucket_name.clone())
            .or_insert_with(Ring::new);
        if let Some(slot) = ring.upsert_with(point.timestamp, || point.clone()) {
            *slot = point;
        }
    }

    /// Add one report's figures into the fleet total for `timestamp`.
    ///
    /// Returns the running total after the addition, or `None` if the
    /// timestamp is older than everything in a full ring.
    pub fn update_total(
        &mut self,
        timestamp: i64,
        rate: f64,
        conn: f64,
        qps_total: f64,
    ) -> Option<TotalPoint> {
        let point = self.total.upsert_with(timestamp, || TotalPoint {
            timestamp,
            ..TotalPoint::default()
        })?;
        point.rate += rate;
        point.conn += conn;
        point.qps_total += qps_total;
        Some(*point)
    }

    /// A bucket's points, oldest first. `None` if the bucket was never seen.
    pub fn snapshot(&self, bucket_name: &str) -> Option<Vec<RingPoint>> {
        self.buckets.get(bucket_name).map(Ring::snapshot)
    }

    /// Fleet total points, oldest first.
    pub fn total_snapshot(&self) -> Vec<TotalPoint> {
        self.total.snapshot()
    }

    /// Newest point for a bucket.
    pub fn latest(&self, bucket_name: &str) -> Option<&RingPoint> {
        self.buckets.get(bucket_name).and_then(Ring::latest)
    }

    /// Newest fleet total point.
    pub fn latest_total(&self) -> Option<&TotalPoint> {
        self.total.latest()
    }

    /// Number of points held for a bucket.
    pub fn len(&self, bucket_name: &str) -> usize {
        self.buckets.get(bucket_name).map_or(0, Ring::len)
    }

    /// Number of buckets with history.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Buckets whose newest point is within `within_secs` of `now`, busiest first.
    pub fn active_buckets(&self, now: i64, within_secs: i64) -> Vec<ActiveBucket> {
        let mut active: Vec<ActiveBucket> = self
            .buckets
            .iter()
            .filter_map(|(name, ring)| {
                let latest = ring.latest()?;
                if now - latest.timestamp > within_secs {
                    return None;
                }
                let total: f64 = ring.points.iter().map(|p| p.sums.observed_rate).sum();
                Some(ActiveBucket {
                    name: name.clone(),
                    last_update: latest.timestamp,
                    average_rate: total / ring.len() as f64,
                })
            })
            .collect();
        active.sort_by(|a, b| {
            b.average_rate
                .total_cmp(&a.average_rate)
                .then_with(|| a.name.cmp(&b.name))
        });
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(bucket: &str, ts: i64, rate: f64, reporters: usize) -> BucketAggregate {
        BucketAggregate {
            bucket_name: bucket.into(),
            timestamp: ts,
            reporters: (0..reporters).map(|i| format!("10.0.0.{i}")).collect(),
            sums: TrafficSums {
                observed_rate: rate,
                ..Default::default()
            },
        }
    }

    #[test]
    fn unknown_bucket_has_no_history() {
        let store = RingStore::new();
        assert!(store.snapshot("nope").is_none());
        assert_eq!(store.len("nope"), 0);
    }

    #[test]
    fn same_timestamp_overwrites_in_place() {
        let mut store = RingStore::new();
        store.update(&aggregate("b", 5, 100.0, 1));
        store.update(&aggregate("b", 5, 300.0, 3));

        let points = store.snapshot("b").unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].sums.observed_rate, 300.0);
        assert_eq!(points[0].reporters, 3);
    }

    #[test]
    fn capacity_is_bounded_and_oldest_evicted() {
        let mut store = RingStore::new();
        for i in 0..=RING_CAPACITY as i64 {
            store.update(&aggregate("b", i * 5, i as f64, 1));
        }

        let points = store.snapshot("b").unwrap();
        assert_eq!(points.len(), RING_CAPACITY);
        assert_eq!(points.first().unwrap().timestamp, 5);
        assert_eq!(points.last().unwrap().timestamp, RING_CAPACITY as i64 * 5);
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let mut store = RingStore::new();
        for ts in [5, 10, 15] {
            store.update(&aggregate("b", ts, 1.0, 1));
        }
        let stamps: Vec<_> = store.snapshot("b").unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![5, 10, 15]);
        assert_eq!(store.latest("b").unwrap().timestamp, 15);
    }

    #[test]
    fn late_point_is_inserted_in_order() {
        let mut store = RingStore::new();
        store.update(&aggregate("b", 1000, 1.0, 1));
        store.update(&aggregate("b", 995, 2.0, 1));
        store.update_total(1000, 1.0, 0.0, 0.0);
        store.update_total(995, 2.0, 0.0, 0.0);

        let stamps: Vec<_> = store.snapshot("b").unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![995, 1000]);
        assert_eq!(store.latest("b").unwrap().timestamp, 1000);

        let totals: Vec<_> = store.total_snapshot().iter().map(|p| p.timestamp).collect();
        assert_eq!(totals, vec![995, 1000]);
        assert_eq!(store.latest_total().unwrap().timestamp, 1000);
        assert_eq!(store.active_buckets(1000, 300)[0].last_update, 1000);
    }

    #[test]
    fn full_ring_drops_points_older_than_everything_held() {
        let mut store = RingStore::new();
        for i in 1..=RING_CAPACITY as i64 {
            store.update(&aggregate("b", i * 5, 1.0, 1));
            store.update_total(i * 5, 1.0, 0.0, 0.0);
        }

        store.update(&aggregate("b", 0, 9.0, 1));
        assert!(store.update_total(0, 9.0, 0.0, 0.0).is_none());
        assert_eq!(store.snapshot("b").unwrap()[0].timestamp, 5);
        assert_eq!(store.total_snapshot()[0].timestamp, 5);

        // a late point inside the held range evicts the oldest
        store.update(&aggregate("b", 12, 9.0, 1));
        let stamps: Vec<_> = store.snapshot("b").unwrap().iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps.len(), RING_CAPACITY);
        assert_eq!(&stamps[..3], &[10, 12, 15]);
    }

    #[test]
    fn total_accumulates_per_timestamp() {
        let mut store = RingStore::new();
        store.update_total(5, 100.0, 2.0, 10.0);
        let running = store.update_total(5, 50.0, 1.0, 5.0).unwrap();
        store.update_total(10, 7.0, 0.0, 0.0);

        assert_eq!(running.rate, 150.0);
        assert_eq!(running.conn, 3.0);
        assert_eq!(running.qps_total, 15.0);

        let totals = store.total_snapshot();
        assert_eq!(totals.len(), 2);
        assert_eq!(store.latest_total().unwrap().rate, 7.0);
    }

    #[test]
    fn active_buckets_sorted_by_average_rate() {
        let mut store = RingStore::new();
        store.update(&aggregate("slow", 1000, 10.0, 1));
        store.update(&aggregate("fast", 995, 100.0, 1));
        store.update(&aggregate("fast", 1000, 300.0, 1));
        store.update(&aggregate("gone", 100, 1e9, 1));

        let active = store.active_buckets(1010, 300);

        let names: Vec<_> = active.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "slow"]);
        assert_eq!(active[0].average_rate, 200.0);
        assert_eq!(active[0].last_update, 1000);
    }
}
