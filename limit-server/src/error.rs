//! Error types for edge-limit.

use edge_limit_types::TypesError;

/// Main error type for edge-limit operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Edge node call failed.
    #[error("edge node error: {0}")]
    Edge(#[from] EdgeError),

    /// Alert dispatch failed.
    #[error("alert error: {0}")]
    Alert(#[from] AlertError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded.
    #[error("record encoding failed: {0}")]
    Record(#[from] TypesError),
}

/// Edge node control endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    /// Connection, timeout or body transfer failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with a non-200 status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// The limit table could not be decoded.
    #[error("undecodable limit table: {0}")]
    Decode(#[from] TypesError),
}

/// Alert dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Connection, timeout or body transfer failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The dispatcher answered with a non-200 status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },
}

/// Result type alias for top-level operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for edge node calls.
pub type EdgeResult<T> = std::result::Result<T, EdgeError>;
