//! Tracing subscriber setup.
//!
//! Finalized aggregates and raw per-node reports go to their own targets so
//! they can be filtered or routed separately:
//!
//! ```bash
//! RUST_LOG=info,edge_limit::report=off edge-limit --config limit.toml
//! ```

use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

use crate::config::LoggingConfig;

/// Target of the per-window statistics line.
pub const STAT_TARGET: &str = "edge_limit::stat";

/// Target of every decoded per-node report.
pub const REPORT_TARGET: &str = "edge_limit::report";

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config.json {
        subscriber
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        subscriber.with(fmt::layer().with_target(true)).try_init()
    }
}
