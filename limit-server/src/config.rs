//! Configuration loading for edge-limit.
//!
//! Configuration is loaded from a TOML file (default: `limit.toml`). Every
//! section and field has a default, so an empty file is a valid config.

use edge_limit_core::AlarmDefaults;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration for edge-limit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Report ingest configuration.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Edge node fleet configuration.
    #[serde(default)]
    pub edge: EdgeConfig,
    /// Global default alarm thresholds.
    #[serde(default)]
    pub alarm: AlarmDefaults,
    /// Alert dispatch configuration.
    #[serde(default)]
    pub alert: AlertConfig,
    /// Persistence configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Administrator credentials.
    #[serde(default)]
    pub admin: AdminConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Report ingest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// UDP addresses to receive reports on (default: 0.0.0.0:7778).
    #[serde(default = "default_ingest_bind")]
    pub bind_addresses: Vec<String>,
    /// Bounded report queue length; receivers wait when it is full (default: 4096).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Largest datagram accepted in bytes (default: 4096).
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:9090).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Edge node fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    /// Control endpoints of the edge nodes (`host:port` or full URL).
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Reconciliation interval in seconds (default: 60).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Timeout per edge-node HTTP call in seconds (default: 5).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Consecutive fetch failures before alerting (default: 0 = never alert).
    #[serde(default)]
    pub fetch_failure_alert_threshold: u32,
}

/// Alert dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Send alerts over HTTP (default: false, alerts are only logged).
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the alert dispatcher.
    #[serde(default)]
    pub endpoint: String,
    /// Instant-message receivers.
    #[serde(default)]
    pub im_receivers: Vec<String>,
    /// Phone receivers.
    #[serde(default)]
    pub phone_receivers: Vec<String>,
    /// Email receivers.
    #[serde(default)]
    pub email_receivers: Vec<String>,
    /// Email subject line.
    #[serde(default = "default_email_title")]
    pub email_title: String,
    /// Pending alert queue length; alerts beyond it are dropped (default: 256).
    #[serde(default = "default_alert_queue_capacity")]
    pub queue_capacity: usize,
    /// Timeout per dispatch call in seconds (default: 5).
    #[serde(default = "default_alert_timeout")]
    pub timeout_secs: u64,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Quota file path (default: conf/quota).
    #[serde(default = "default_quota_file")]
    pub quota_file: PathBuf,
    /// SQLite database for finalized statistics (optional, disabled if absent).
    pub stats_database: Option<PathBuf>,
}

/// Administrator credentials for the quota endpoint.
#[derive(Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// User name to password.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.users.keys().collect();
        names.sort();
        f.debug_struct("AdminConfig")
            .field("users", &names)
            .finish_non_exhaustive()
    }
}

impl AdminConfig {
    /// Check a user/password pair.
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        self.users.get(user).is_some_and(|p| p == password)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset (default: info).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output (default: false).
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_ingest_bind() -> Vec<String> {
    vec!["0.0.0.0:7778".to_string()]
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_max_datagram_size() -> usize {
    4096
}

fn default_http_bind() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    5
}

fn default_email_title() -> String {
    "edge-limit alarm".to_string()
}

fn default_alert_queue_capacity() -> usize {
    256
}

fn default_alert_timeout() -> u64 {
    5
}

fn default_quota_file() -> PathBuf {
    PathBuf::from("conf/quota")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind_addresses: default_ingest_bind(),
            queue_capacity: default_queue_capacity(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            fetch_failure_alert_threshold: 0,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            im_receivers: Vec::new(),
            phone_receivers: Vec::new(),
            email_receivers: Vec::new(),
            email_title: default_email_title(),
            queue_capacity: default_alert_queue_capacity(),
            timeout_secs: default_alert_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quota_file: default_quota_file(),
            stats_database: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
