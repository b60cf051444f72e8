//! edge-limit binary entry point.
//!
//! Usage:
//! ```bash
//! edge-limit --config limit.toml
//! edge-limit --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use edge_limit_server::config::Config;
use edge_limit_server::{logging, server};
use std::path::PathBuf;
use tokio::sync::watch;

/// Control plane for rate-limiting edge nodes.
#[derive(Parser, Debug)]
#[command(name = "edge-limit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = "limit.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.logging).context("installing log subscriber")?;

    tracing::info!(
        "edge-limit v{} starting with {}",
        env!("CARGO_PKG_VERSION"),
        cli.config.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // keep the sender alive; dropping it stops every task
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    server::serve(config, shutdown_rx)
        .await
        .context("control plane failed")
}
