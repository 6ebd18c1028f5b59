use anyhow::{Context, Result};
use ssp::app::App;
use ssp::config::AppConfig;
use ssp::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first (before logging init) to get logging config
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    let _guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging system")?;

    // Proxy TLS (https, https+h2) uses ring
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install default crypto provider: {:?}", e))?;

    info!("SNI proxy starting...");
    info!(
        "Logging initialized - level: {}, file: {:?}, json: {}",
        config.logging.level, config.logging.file, config.logging.json
    );

    let mut app = App::new(config);
    app.start().await.context("Failed to start SNI proxy")?;

    info!("SNI proxy started. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received, shutting down...");
    app.wait_for_shutdown().await;

    Ok(())
}
