//! # limit-types
//!
//! Wire and persistence types for the edge-limit control plane.
//!
//! This crate provides the types shared by every edge-limit crate:
//! - [`BucketReport`], [`QpsBreakdown`] - per-node traffic reports received over UDP
//! - [`LimitEntry`] - one row of an edge node's applied limit table
//! - [`BucketQuota`], [`QuotaKind`], [`QuotaValues`] - administrator-configured quotas
//! - [`TypesError`] - decode errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod limit;
mod quota;
mod report;

pub use error::TypesError;
pub use limit::LimitEntry;
pub use quota::{BucketQuota, QuotaKind, QuotaValues};
pub use report::{BucketReport, QpsBreakdown};
