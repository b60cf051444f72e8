//! Error types for edge-limit wire formats.

use thiserror::Error;

/// Errors that can occur while decoding edge-limit wire data.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON decoding failed
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Report is missing its bucket name
    #[error("report has an empty bucket name")]
    EmptyBucket,

    /// Unknown quota type discriminator
    #[error("unknown quota type: {0}")]
    UnknownQuotaType(u8),

    /// Unknown quota kind name
    #[error("unknown quota kind: {0:?}")]
    UnknownQuotaKind(String),
}
