//! Administrator-configured bucket quotas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Which of a bucket's two quota slots a value belongs to.
///
/// Persisted as the integer `QuotaType` (0 = alarm, 1 = limit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum QuotaKind {
    /// Informational threshold, only used for alerting.
    Alarm,
    /// Enforced ceiling, distributed to edge nodes.
    Limit,
}

impl QuotaKind {
    /// Both kinds, in slot order.
    pub const ALL: [QuotaKind; 2] = [QuotaKind::Alarm, QuotaKind::Limit];

    /// Admin-form name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::Alarm => "warn",
            QuotaKind::Limit => "limit",
        }
    }
}

impl From<QuotaKind> for u8 {
    fn from(kind: QuotaKind) -> u8 {
        match kind {
            QuotaKind::Alarm => 0,
            QuotaKind::Limit => 1,
        }
    }
}

impl TryFrom<u8> for QuotaKind {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QuotaKind::Alarm),
            1 => Ok(QuotaKind::Limit),
            other => Err(TypesError::UnknownQuotaType(other)),
        }
    }
}

impl FromStr for QuotaKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" | "alarm" => Ok(QuotaKind::Alarm),
            "limit" => Ok(QuotaKind::Limit),
            other => Err(TypesError::UnknownQuotaKind(other.to_string())),
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four ceilings of a quota. Zero means "not set" for that dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaValues {
    /// Bucket rate ceiling (bytes per second)
    pub rate: u64,
    /// Concurrent connection ceiling
    pub conn: u64,
    /// Requests per second ceiling
    pub qps: u64,
    /// Per-connection rate ceiling (bytes per second)
    pub per_conn_rate: u64,
}

impl QuotaValues {
    /// Create quota values.
    pub fn new(rate: u64, conn: u64, qps: u64, per_conn_rate: u64) -> Self {
        Self {
            rate,
            conn,
            qps,
            per_conn_rate,
        }
    }

    /// True when every dimension is zero.
    pub fn is_zero(&self) -> bool {
        self.rate == 0 && self.conn == 0 && self.qps == 0 && self.per_conn_rate == 0
    }
}

/// One persisted quota record; the quota file holds one per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketQuota {
    /// Bucket the quota applies to
    #[serde(rename = "BucketName")]
    pub bucket_name: String,
    /// Alarm or limit slot
    #[serde(rename = "QuotaType")]
    pub kind: QuotaKind,
    /// Rate ceiling
    #[serde(rename = "RateQuota")]
    pub rate: u64,
    /// Connection ceiling
    #[serde(rename = "ConnQuota")]
    pub conn: u64,
    /// QPS ceiling
    #[serde(rename = "QpsQuota")]
    pub qps: u64,
    /// Per-connection rate ceiling
    #[serde(rename = "RatePerConn", default)]
    pub per_conn_rate: u64,
}

impl BucketQuota {
    /// Build a record from its parts.
    pub fn new(bucket_name: impl Into<String>, kind: QuotaKind, values: QuotaValues) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            kind,
            rate: values.rate,
            conn: values.conn,
            qps: values.qps,
            per_conn_rate: values.per_conn_rate,
        }
    }

    /// The record's ceilings.
    pub fn values(&self) -> QuotaValues {
        QuotaValues::new(self.rate, self.conn, self.qps, self.per_conn_rate)
    }

    /// Decode one line of the quota file.
    pub fn from_line(line: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Encode as one line of the quota file (without the trailing newline).
    pub fn to_line(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }
}
