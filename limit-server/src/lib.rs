//! # edge-limit-server
//!
//! Control plane for a fleet of rate-limiting edge reverse proxies.
//!
//! This crate implements a daemon that:
//! - Receives per-bucket traffic reports from every edge node over UDP
//! - Aggregates them in a 3-slot sliding window and keeps a short display history
//! - Checks finalized figures against alarm quotas and raises alerts
//! - Holds the administrator quota table and persists it to disk
//! - Converges each edge node's applied limit table toward its share of the quotas
//!
//! ## Architecture
//!
//! ```text
//! edge nodes ──UDP──► ingest ──queue──► aggregator ──► rings / stats / alarms
//!     ▲                                                      │
//!     │                                                      ▼
//!     └────HTTP──── reconcilers ◄──── quota table ◄──── admin HTTP
//! ```
//!
//! ## Edge node protocol
//!
//! - `GET /?list` returns the applied limit table
//! - `POST /` creates or updates one bucket's limit
//! - `DELETE /?LimitBucketName=<name>` removes one bucket's limit

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod alert;
pub mod config;
pub mod edge;
pub mod error;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod quota_table;
pub mod reconciler;
pub mod server;
pub mod storage;
