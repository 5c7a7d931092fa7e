//! Backup service binary
//!
//! Configuration comes from `BIZOPS_*` environment variables (see
//! `bizops_backup::config::env_keys`); log filtering from `RUST_LOG`.

use anyhow::Context;
use bizops_backup::config::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bizops_backup=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env().context("failed to load configuration")?;
    bizops_backup::http::serve(config)
        .await
        .context("backup service terminated with an error")?;

    Ok(())
}
