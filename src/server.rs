//! TCP accept loop handing each connection to a [`ConnectionSupervisor`].

use crate::config::ServerConfig;
use crate::dialer::Dialer;
use crate::metrics::Metrics;
use crate::supervisor::ConnectionSupervisor;
use crate::utils::BackoffCounter;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info_span, warn};

const ACCEPT_BACKOFF_BASE_MS: u64 = 100;
const ACCEPT_BACKOFF_MAX_MS: u64 = 5000;

pub struct ProxyServer {
    listener: TcpListener,
    supervisor: ConnectionSupervisor,
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl ProxyServer {
    /// Bind the listener; backends are dialed on the port actually bound
    pub async fn bind(
        config: &ServerConfig,
        dialer: Arc<dyn Dialer>,
        metrics: Metrics,
    ) -> Result<Self> {
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind SNI proxy to {}", bind_addr))?;
        let port = listener
            .local_addr()
            .context("Failed to read listener address")?
            .port();

        let supervisor = ConnectionSupervisor::from_config(config, dialer, port, metrics);
        Ok(Self::from_listener(listener, supervisor, config.max_connections))
    }

    pub fn from_listener(
        listener: TcpListener,
        supervisor: ConnectionSupervisor,
        max_connections: usize,
    ) -> Self {
        Self {
            listener,
            supervisor,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept forever; accept errors are logged and retried with backoff
    pub async fn run(self) -> Result<()> {
        let metrics = self.supervisor.metrics().clone();
        let backoff = BackoffCounter::new(ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => {
                    backoff.reset();
                    accepted
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(error = %e, retry_in_ms = delay.as_millis() as u64, "Accept error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                metrics.record_reject();
                warn!(
                    peer = %peer,
                    limit = self.max_connections,
                    "Connection limit reached, dropping connection"
                );
                continue;
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            metrics.record_accept();
            let supervisor = self.supervisor.clone();
            let metrics = metrics.clone();
            let span = info_span!(
                "connection",
                peer = %peer,
                server_name = tracing::field::Empty,
                backend = tracing::field::Empty,
            );
            tokio::spawn(
                async move {
                    debug!("Accepted connection");
                    // Errors are logged by the supervisor at the failing step
                    let _ = supervisor.handle(stream).await;
                    metrics.record_close();
                    drop(permit);
                }
                .instrument(span),
            );
        }
    }
}
