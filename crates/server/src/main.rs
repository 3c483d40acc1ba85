// crates/server/src/main.rs
//! ytdlp-webui server binary.
//!
//! Restores the job registry, then serves the web UI and both RPC transports
//! until SIGINT, SIGTERM or SIGQUIT.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use ytdlp_webui_server::{init_metrics, Config, Lifecycle};

const DEFAULT_LOG_FILTER: &str = "warn,ytdlp_webui_server=info,ytdlp_webui_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.addr(),
        download_dir = %config.download_dir().display(),
        snapshot = %config.snapshot_path().display(),
        "starting ytdlp-webui"
    );

    Lifecycle::run(config).await?;
    Ok(())
}
