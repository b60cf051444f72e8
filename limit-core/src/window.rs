//! Three-slot sliding window over per-node bucket reports.
//!
//! Edge nodes report once per window for every bucket they served. Reports
//! from different nodes for the same window arrive spread out and slightly
//! out of order, so the aggregator keeps three live slots:
//!
//! ```text
//!   previous        current          next
//!   t - D           t                t + D
//!   late reports    on-time reports  early reports (triggers a slide)
//! ```
//!
//! A report for `next` slides the window forward first: `previous` is
//! finalized and reused as the new `next`. Slots are rotated by index and
//! reset in place, never reallocated.
//!
//! If no slide happened for longer than [`STALE_AFTER`] (process restart,
//! reporting gap) the next report re-initializes the window around its own
//! timestamp, after finalizing whatever the old slots still held.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use edge_limit_types::BucketReport;
use thiserror::Error;

use crate::aggregate::{BucketAggregate, TrafficSums};

/// Width of one window slot, in seconds.
pub const WINDOW_DURATION_SECS: i64 = 5;

/// Number of live slots.
pub const WINDOW_SLOTS: usize = 3;

/// Time without a slide after which the window is re-initialized.
pub const STALE_AFTER: Duration = Duration::from_secs(10);

/// Maximum distinct reporters per bucket per window.
pub const MAX_REPORTERS: usize = 32;

/// Why a report was not folded in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The timestamp matches none of the live slots.
    #[error("timestamp {timestamp} outside window [{previous}, {current}, {next}]")]
    OutsideWindow {
        /// Report timestamp
        timestamp: i64,
        /// Live `previous` slot timestamp
        previous: i64,
        /// Live `current` slot timestamp
        current: i64,
        /// Live `next` slot timestamp
        next: i64,
    },
    /// This server already contributed to the bucket in this window.
    #[error("duplicate report from {server}")]
    Duplicate {
        /// Reporting server address
        server: String,
    },
    /// The timestamp is too close to the limits of `i64` to place a window around.
    #[error("timestamp {timestamp} out of range")]
    TimestampOutOfRange {
        /// Report timestamp
        timestamp: i64,
    },
    /// The bucket already has the maximum number of reporters in this window.
    #[error("reporter set full ({capacity} servers)")]
    ReporterSetFull {
        /// Reporter set capacity
        capacity: usize,
    },
}

/// Result of a reporter set insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The address was new and has been recorded.
    Added,
    /// The address was already present.
    Duplicate,
    /// The set is at capacity.
    Full,
}

/// Bounded set of reporting server addresses.
#[derive(Debug, Clone, Default)]
pub struct ReporterSet {
    addrs: Vec<String>,
}

impl ReporterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            addrs: Vec::with_capacity(MAX_REPORTERS),
        }
    }

    /// Maximum number of addresses held.
    pub fn capacity(&self) -> usize {
        MAX_REPORTERS
    }

    /// Check membership.
    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.iter().any(|a| a == addr)
    }

    /// Record an address unless it is already present or the set is full.
    pub fn insert(&mut self, addr: &str) -> Admission {
        if self.contains(addr) {
            return Admission::Duplicate;
        }
        if self.addrs.len() >= MAX_REPORTERS {
            return Admission::Full;
        }
        self.addrs.push(addr.to_string());
        Admission::Added
    }

    /// Number of distinct reporters.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// True if nobody has reported.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Addresses in arrival order.
    pub fn as_slice(&self) -> &[String] {
        &self.addrs
    }

    /// Forget every address, keeping the allocation.
    pub fn clear(&mut self) {
        self.addrs.clear();
    }
}

/// Running sums for one bucket in one slot.
#[derive(Debug, Clone, Default)]
pub struct BucketAccumulator {
    sums: TrafficSums,
    reporters: ReporterSet,
}

impl BucketAccumulator {
    /// Fold a report in, at most once per reporting server.
    pub fn fold(&mut self, report: &BucketReport) -> Result<(), Rejection> {
        match self.reporters.insert(&report.server_addr) {
            Admission::Added => {
                self.sums.add_report(report);
                Ok(())
            }
            Admission::Duplicate => Err(Rejection::Duplicate {
                server: report.server_addr.clone(),
            }),
            Admission::Full => Err(Rejection::ReporterSetFull {
                capacity: self.reporters.capacity(),
            }),
        }
    }

    /// Current sums.
    pub fn sums(&self) -> &TrafficSums {
        &self.sums
    }

    /// Distinct reporters folded in so far.
    pub fn reporters(&self) -> &ReporterSet {
        &self.reporters
    }

    /// True if nothing has been folded in since the last reset.
    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Zero the sums and clear the reporters.
    pub fn reset(&mut self) {
        self.sums = TrafficSums::default();
        self.reporters.clear();
    }

    fn snapshot(&self, bucket_name: &str, timestamp: i64) -> BucketAggregate {
        BucketAggregate {
            bucket_name: bucket_name.to_string(),
            timestamp,
            reporters: self.reporters.as_slice().to_vec(),
            sums: self.sums,
        }
    }
}

/// One window slot: a timestamp and the accumulators of every bucket seen.
#[derive(Debug, Clone, Default)]
pub struct WindowSlot {
    timestamp: i64,
    buckets: HashMap<String, BucketAccumulator>,
}

impl WindowSlot {
    /// Slot timestamp (epoch seconds).
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Accumulator for a bucket, if the bucket was ever seen in this slot.
    pub fn accumulator(&self, bucket_name: &str) -> Option<&BucketAccumulator> {
        self.buckets.get(bucket_name)
    }

    /// Finalize every bucket with at least one reporter and reset it in place.
    ///
    /// Output is ordered by bucket name.
    fn drain_finalized(&mut self) -> Vec<BucketAggregate> {
        let timestamp = self.timestamp;
        let mut finalized: Vec<BucketAggregate> = self
            .buckets
            .iter_mut()
            .filter(|(_, acc)| !acc.is_empty())
            .map(|(name, acc)| {
                let agg = acc.snapshot(name, timestamp);
                acc.reset();
                agg
            })
            .collect();
        finalized.sort_by(|a, b| a.bucket_name.cmp(&b.bucket_name));
        finalized
    }
}

/// What happened to one ingested report.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The window was (re)initialized around this report.
    pub reinitialized: bool,
    /// The window slid forward before folding.
    pub slid: bool,
    /// Aggregates finalized by re-initialization or sliding, oldest slot first.
    pub flushed: Vec<BucketAggregate>,
    /// The bucket's running aggregate after folding, or why it was rejected.
    pub result: Result<BucketAggregate, Rejection>,
}

impl IngestOutcome {
    /// The running aggregate if the report was accepted.
    pub fn accepted(&self) -> Option<&BucketAggregate> {
        self.result.as_ref().ok()
    }
}

/// Sliding-window aggregator.
///
/// Single owner, no interior locking: exactly one consumer feeds it.
#[derive(Debug, Default)]
pub struct WindowAggregator {
    slots: [WindowSlot; WINDOW_SLOTS],
    prev: usize,
    curr: usize,
    next: usize,
    last_slide: Option<Instant>,
}

impl WindowAggregator {
    /// Create an uninitialized aggregator; the first report initializes it.
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            prev: 0,
            curr: 1,
            next: 2,
            last_slide: None,
        }
    }

    /// Whether any report has been ingested yet.
    pub fn is_initialized(&self) -> bool {
        self.last_slide.is_some()
    }

    /// Live slot timestamps as `[previous, current, next]`.
    pub fn timestamps(&self) -> Option<[i64; WINDOW_SLOTS]> {
        self.last_slide.map(|_| self.live_timestamps())
    }

    /// The `previous` slot.
    pub fn previous(&self) -> &WindowSlot {
        &self.slots[self.prev]
    }

    /// The `current` slot.
    pub fn current(&self) -> &WindowSlot {
        &self.slots[self.curr]
    }

    /// The `next` slot.
    pub fn next(&self) -> &WindowSlot {
        &self.slots[self.next]
    }

    /// Ingest one report observed at `now`.
    pub fn ingest(&mut self, report: &BucketReport, now: Instant) -> IngestOutcome {
        let mut flushed = Vec::new();

        if !has_window_room(report.timestamp) {
            return IngestOutcome {
                reinitialized: false,
                slid: false,
                flushed,
                result: Err(Rejection::TimestampOutOfRange {
                    timestamp: report.timestamp,
                }),
            };
        }

        let stale = match self.last_slide {
            None => true,
            Some(at) => now.saturating_duration_since(at) > STALE_AFTER,
        };
        if stale {
            flushed.extend(self.flush_all());
            self.recentre(report.timestamp, now);
        }

        let Some(which) = self.slot_index(report.timestamp) else {
            let [previous, current, next] = self.live_timestamps();
            return IngestOutcome {
                reinitialized: stale,
                slid: false,
                flushed,
                result: Err(Rejection::OutsideWindow {
                    timestamp: report.timestamp,
                    previous,
                    current,
                    next,
                }),
            };
        };

        let slid = which == self.next;
        if slid {
            flushed.extend(self.slide(now));
        }

        let slot = &mut self.slots[which];
        let timestamp = slot.timestamp;
        let acc = slot.buckets.entry(report.bucket_name.clone()).or_default();
        let result = acc
            .fold(report)
            .map(|()| acc.snapshot(&report.bucket_name, timestamp));

        IngestOutcome {
            reinitialized: stale,
            slid,
            flushed,
            result,
        }
    }

    /// Finalize all three slots in `previous -> current -> next` order.
    pub fn flush_all(&mut self) -> Vec<BucketAggregate> {
        let mut flushed = Vec::new();
        for idx in [self.prev, self.curr, self.next] {
            flushed.extend(self.slots[idx].drain_finalized());
        }
        flushed
    }

    fn live_timestamps(&self) -> [i64; WINDOW_SLOTS] {
        [
            self.slots[self.prev].timestamp,
            self.slots[self.curr].timestamp,
            self.slots[self.next].timestamp,
        ]
    }

    fn slot_index(&self, timestamp: i64) -> Option<usize> {
        [self.prev, self.curr, self.next]
            .into_iter()
            .find(|&idx| self.slots[idx].timestamp == timestamp)
    }

    fn recentre(&mut self, timestamp: i64, now: Instant) {
        self.slots[self.prev].timestamp = timestamp - WINDOW_DURATION_SECS;
        self.slots[self.curr].timestamp = timestamp;
        self.slots[self.next].timestamp = timestamp + WINDOW_DURATION_SECS;
        self.last_slide = Some(now);
    }

    fn slide(&mut self, now: Instant) -> Vec<BucketAggregate> {
        let flushed = self.slots[self.prev].drain_finalized();

        let recycled = self.prev;
        self.prev = self.curr;
        self.curr = self.next;
        self.next = recycled;
        self.slots[self.next].timestamp = self.slots[self.curr].timestamp + WINDOW_DURATION_SECS;
        self.last_slide = Some(now);

        flushed
    }
}

/// Both neighbouring slots of `timestamp` fit in an `i64`.
fn has_window_room(timestamp: i64) -> bool {
    timestamp.checked_sub(WINDOW_DURATION_SECS).is_some()
        && timestamp.checked_add(WINDOW_DURATION_SECS).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000;
    const D: i64 = WINDOW_DURATION_SECS;

    fn report(bucket: &str, ts: i64, server: &str, rate: f64) -> BucketReport {
        BucketReport {
            bucket_name: bucket.into(),
            timestamp: ts,
            server_addr: server.into(),
            observed_rate: rate,
            ..Default::default()
        }
    }

    #[test]
    fn first_report_centres_window() {
        let mut window = WindowAggregator::new();
        assert!(!window.is_initialized());
        assert_eq!(window.timestamps(), None);

        let outcome = window.ingest(&report("b", T, "10.0.0.1", 1.0), Instant::now());

        assert!(outcome.reinitialized);
        assert!(!outcome.slid);
        assert!(outcome.flushed.is_empty());
        assert_eq!(window.timestamps(), Some([T - D, T, T + D]));
        assert_eq!(outcome.accepted().unwrap().reporter_count(), 1);
    }

    #[test]
    fn duplicate_server_is_rejected_without_changing_sums() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 100.0), now);

        let outcome = window.ingest(&report("b", T, "10.0.0.1", 999.0), now);

        assert_eq!(
            outcome.result.unwrap_err(),
            Rejection::Duplicate {
                server: "10.0.0.1".into()
            }
        );
        let acc = window.current().accumulator("b").unwrap();
        assert_eq!(acc.sums().observed_rate, 100.0);
        assert_eq!(acc.reporters().len(), 1);
    }

    #[test]
    fn same_server_may_report_different_buckets() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("a", T, "10.0.0.1", 1.0), now);
        let outcome = window.ingest(&report("b", T, "10.0.0.1", 1.0), now);
        assert!(outcome.accepted().is_some());
    }

    #[test]
    fn timestamps_outside_window_are_rejected() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), now);

        for ts in [T - 2 * D, T + 2 * D, T + 1, T - 3] {
            let outcome = window.ingest(&report("other", ts, "10.0.0.9", 1.0), now);
            assert!(matches!(
                outcome.result,
                Err(Rejection::OutsideWindow { timestamp, .. }) if timestamp == ts
            ));
            assert!(outcome.flushed.is_empty());
        }
        assert_eq!(window.timestamps(), Some([T - D, T, T + D]));
    }

    #[test]
    fn late_report_lands_in_previous_slot() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), now);

        let outcome = window.ingest(&report("b", T - D, "10.0.0.2", 7.0), now);

        assert!(!outcome.slid);
        assert_eq!(outcome.accepted().unwrap().timestamp, T - D);
        assert_eq!(
            window.previous().accumulator("b").unwrap().sums().observed_rate,
            7.0
        );
    }

    #[test]
    fn next_slot_report_slides_window_first() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), now);
        window.ingest(&report("b", T - D, "10.0.0.1", 5.0), now);

        let outcome = window.ingest(&report("b", T + D, "10.0.0.1", 2.0), now);

        assert!(outcome.slid);
        assert_eq!(window.timestamps(), Some([T, T + D, T + 2 * D]));
        // the old previous slot was finalized
        assert_eq!(outcome.flushed.len(), 1);
        assert_eq!(outcome.flushed[0].timestamp, T - D);
        assert_eq!(outcome.flushed[0].sums.observed_rate, 5.0);
        // and recycled as the new, empty next slot
        assert!(window.next().accumulator("b").unwrap().is_empty());
        assert_eq!(outcome.accepted().unwrap().timestamp, T + D);
    }

    #[test]
    fn three_reporters_aggregate_into_one_finalized_point() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        for server in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            window.ingest(&report("images", T, server, 100.0), now);
        }

        window.ingest(&report("images", T + D, "10.0.0.1", 1.0), now);
        let outcome = window.ingest(&report("images", T + 2 * D, "10.0.0.1", 1.0), now);

        let finalized = &outcome.flushed[0];
        assert_eq!(finalized.bucket_name, "images");
        assert_eq!(finalized.timestamp, T);
        assert_eq!(finalized.sums.observed_rate, 300.0);
        assert_eq!(finalized.reporter_count(), 3);
    }

    #[test]
    fn window_always_holds_three_spaced_slots() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), now);

        for step in 1..=10 {
            let ts = T + step * D;
            window.ingest(&report("b", ts, "10.0.0.1", 1.0), now);
            let [p, c, n] = window.timestamps().unwrap();
            assert_eq!(c, ts);
            assert_eq!(c - p, D);
            assert_eq!(n - c, D);
        }
    }

    #[test]
    fn stale_window_reinitializes_around_new_report() {
        let mut window = WindowAggregator::new();
        let start = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 10.0), start);
        window.ingest(&report("c", T + D, "10.0.0.1", 20.0), start);

        let later = start + STALE_AFTER + Duration::from_secs(1);
        let resumed = T + 600;
        let outcome = window.ingest(&report("b", resumed, "10.0.0.1", 30.0), later);

        assert!(outcome.reinitialized);
        assert_eq!(window.timestamps(), Some([resumed - D, resumed, resumed + D]));
        // everything still held was finalized, oldest slot first
        let flushed: Vec<_> = outcome
            .flushed
            .iter()
            .map(|a| (a.bucket_name.as_str(), a.timestamp))
            .collect();
        assert_eq!(flushed, vec![("b", T), ("c", T + D)]);
        assert_eq!(outcome.accepted().unwrap().sums.observed_rate, 30.0);
    }

    #[test]
    fn exactly_stale_threshold_does_not_reinitialize() {
        let mut window = WindowAggregator::new();
        let start = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), start);

        let outcome = window.ingest(&report("b", T, "10.0.0.2", 1.0), start + STALE_AFTER);

        assert!(!outcome.reinitialized);
        assert_eq!(outcome.accepted().unwrap().reporter_count(), 2);
    }

    #[test]
    fn sliding_refreshes_staleness_clock() {
        let mut window = WindowAggregator::new();
        let start = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), start);
        window.ingest(&report("b", T + D, "10.0.0.1", 1.0), start + Duration::from_secs(6));

        let outcome = window.ingest(&report("b", T + D, "10.0.0.2", 1.0), start + Duration::from_secs(12));

        assert!(!outcome.reinitialized);
    }

    #[test]
    fn reporter_set_overflow_is_rejected() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        for i in 0..MAX_REPORTERS {
            let outcome = window.ingest(&report("b", T, &format!("10.0.0.{i}"), 1.0), now);
            assert!(outcome.accepted().is_some());
        }

        let outcome = window.ingest(&report("b", T, "10.0.1.1", 1.0), now);

        assert_eq!(
            outcome.result.unwrap_err(),
            Rejection::ReporterSetFull {
                capacity: MAX_REPORTERS
            }
        );
        assert_eq!(
            window.current().accumulator("b").unwrap().sums().observed_rate,
            MAX_REPORTERS as f64
        );
    }

    #[test]
    fn flush_all_drains_in_slot_order_and_skips_empty_buckets() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();
        window.ingest(&report("a", T, "10.0.0.1", 1.0), now);
        window.ingest(&report("b", T - D, "10.0.0.1", 1.0), now);
        // slides, finalizing "b" and recycling its slot
        window.ingest(&report("c", T + D, "10.0.0.1", 1.0), now);
        window.ingest(&report("d", T, "10.0.0.1", 1.0), now);

        let flushed = window.flush_all();
        let order: Vec<_> = flushed
            .iter()
            .map(|a| (a.bucket_name.as_str(), a.timestamp))
            .collect();
        assert_eq!(order, vec![("a", T), ("d", T), ("c", T + D)]);

        assert!(window.flush_all().is_empty());
        assert!(window.next().accumulator("b").unwrap().is_empty());
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_touching_the_window() {
        let mut window = WindowAggregator::new();
        let now = Instant::now();

        for ts in [i64::MAX, i64::MIN, i64::MAX - D + 1] {
            let outcome = window.ingest(&report("b", ts, "10.0.0.1", 1.0), now);
            assert_eq!(
                outcome.result.unwrap_err(),
                Rejection::TimestampOutOfRange { timestamp: ts }
            );
            assert!(!outcome.reinitialized);
        }
        assert!(!window.is_initialized());

        window.ingest(&report("b", T, "10.0.0.1", 1.0), now);
        let outcome = window.ingest(&report("b", i64::MAX, "10.0.0.2", 1.0), now);
        assert!(outcome.flushed.is_empty());
        assert_eq!(window.timestamps(), Some([T - D, T, T + D]));
    }

    #[test]
    fn reinitialization_keeps_slot_accumulators() {
        let mut window = WindowAggregator::new();
        let start = Instant::now();
        window.ingest(&report("b", T, "10.0.0.1", 1.0), start);

        let later = start + STALE_AFTER + Duration::from_secs(1);
        window.ingest(&report("c", T + 600, "10.0.0.1", 1.0), later);

        // "b" was finalized and reset in place, not dropped
        let acc = window.current().accumulator("b").unwrap();
        assert!(acc.is_empty());
        assert_eq!(acc.sums().observed_rate, 0.0);
    }

    #[test]
    fn reporter_set_semantics() {
        let mut set = ReporterSet::new();
        assert_eq!(set.insert("a"), Admission::Added);
        assert_eq!(set.insert("a"), Admission::Duplicate);
        assert!(set.contains("a"));
        assert_eq!(set.len(), 1);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), MAX_REPORTERS);
    }
}
