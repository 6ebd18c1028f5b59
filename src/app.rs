use crate::config::AppConfig;
use crate::dialer::{Dialer, resolve_from_environment};
use crate::metrics::Metrics;
use crate::server::ProxyServer;
use crate::stats::StatsServer;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Wires configuration, the resolved dialer and the listeners together
pub struct App {
    config: AppConfig,
    dialer: Arc<dyn Dialer>,
    metrics: Metrics,
    handles: Vec<JoinHandle<()>>,
}

impl App {
    /// Build the app with the proxy policy from the environment
    pub fn new(config: AppConfig) -> Self {
        Self::with_dialer(config, resolve_from_environment())
    }

    pub fn with_dialer(config: AppConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            dialer,
            metrics: Metrics::new(),
            handles: Vec::new(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn dialer(&self) -> &Arc<dyn Dialer> {
        &self.dialer
    }

    /// Bind and spawn the proxy listener and, if enabled, the stats server.
    ///
    /// Returns the proxy's listening address. Bind failures are returned.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        info!("Starting SNI proxy...");

        let server = ProxyServer::bind(
            &self.config.server,
            Arc::clone(&self.dialer),
            self.metrics.clone(),
        )
        .await?;
        let addr = server.local_addr()?;
        info!(listen = %addr, dialer = ?self.dialer, "SNI proxy listening");
        self.handles.push(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("SNI proxy listener error: {}", e);
            }
        }));

        if self.config.stats.enabled {
            let stats = StatsServer::bind(&self.config.stats, self.metrics.clone())
                .await
                .context("Failed to start stats server")?;
            self.handles.push(tokio::spawn(async move {
                if let Err(e) = stats.run().await {
                    error!("Stats server error: {}", e);
                }
            }));
        } else {
            info!("Stats server is disabled");
        }

        Ok(addr)
    }

    /// Stop accepting; connections already handed off run to completion
    pub async fn wait_for_shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        info!("Listeners stopped");
    }
}
