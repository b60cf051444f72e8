//! # limit-core
//!
//! Pure aggregation and reconciliation logic for edge-limit (no I/O, instant tests).
//!
//! This crate implements the window aggregation, history ring and quota
//! reconciliation algorithms without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`WindowAggregator::ingest`] returns an [`IngestOutcome`] listing the
//!   aggregates it finalized instead of writing them anywhere
//! - [`reconcile::plan`] returns the pushes and deletes needed to converge a
//!   node instead of issuing them
//! - [`alarm::check`] returns the alert text instead of sending it
//!
//! The actual I/O (UDP, HTTP, disk, SQLite) is performed by `limit-server`,
//! which interprets these outcomes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod alarm;
pub mod quota;
pub mod reconcile;
pub mod ring;
pub mod window;

pub use aggregate::{BucketAggregate, TrafficSums};
pub use alarm::{Observed, TOTAL_SUBJECT};
pub use quota::{AlarmDefaults, QuotaMap, QuotaPair, SetEffect, TOTAL_BUCKET};
pub use reconcile::{desired_limits, per_node_share, ReconcilePlan};
pub use ring::{ActiveBucket, RingPoint, RingStore, TotalPoint, RING_CAPACITY};
pub use window::{
    Admission, BucketAccumulator, IngestOutcome, Rejection, ReporterSet, WindowAggregator, WindowSlot,
    MAX_REPORTERS, STALE_AFTER, WINDOW_DURATION_SECS, WINDOW_SLOTS,
};
