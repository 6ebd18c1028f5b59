//! Per-connection orchestration: peek, dial, relay.

use crate::config::ServerConfig;
use crate::dialer::{Dialer, Network, ProxyStream, join_host_port};
use crate::error::ProxyError;
use crate::metrics::Metrics;
use crate::relay::{RelayStats, relay};
use crate::sni::HelloPeeker;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default read deadline for the ClientHello
pub const DEFAULT_PEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    PeekingHello,
    HelloExtracted,
    Dialing,
    Relaying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::PeekingHello => "peeking_hello",
            ConnectionState::HelloExtracted => "hello_extracted",
            ConnectionState::Dialing => "dialing",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct StateTracker {
    state: ConnectionState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: ConnectionState::Accepted,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        trace!(from = %self.state, to = %next, "Connection state change");
        self.state = next;
    }

    fn current(&self) -> ConnectionState {
        self.state
    }
}

/// Runs the peek → dial → relay sequence for each accepted connection.
///
/// Cheap to clone; every connection task gets its own copy sharing the
/// dialer and metrics.
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    dialer: Arc<dyn Dialer>,
    peeker: HelloPeeker,
    listen_port: u16,
    peek_timeout: Duration,
    metrics: Metrics,
}

impl ConnectionSupervisor {
    /// Backends are dialed at `<server name>:<listen_port>`
    pub fn new(dialer: Arc<dyn Dialer>, listen_port: u16) -> Self {
        Self {
            dialer,
            peeker: HelloPeeker::default(),
            listen_port,
            peek_timeout: DEFAULT_PEEK_TIMEOUT,
            metrics: Metrics::default(),
        }
    }

    pub fn from_config(
        config: &ServerConfig,
        dialer: Arc<dyn Dialer>,
        listen_port: u16,
        metrics: Metrics,
    ) -> Self {
        Self::new(dialer, listen_port)
            .with_peek_timeout(config.peek_timeout())
            .with_peeker(HelloPeeker::new(config.max_hello_bytes))
            .with_metrics(metrics)
    }

    pub fn with_peek_timeout(mut self, timeout: Duration) -> Self {
        self.peek_timeout = timeout;
        self
    }

    pub fn with_peeker(mut self, peeker: HelloPeeker) -> Self {
        self.peeker = peeker;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Drive one connection to completion.
    ///
    /// Failures are logged once, counted, and returned; the client stream is
    /// dropped without anything having been written to it.
    pub async fn handle<S: ProxyStream>(&self, client: S) -> Result<RelayStats, ProxyError> {
        let mut state = StateTracker::new();

        state.advance(ConnectionState::PeekingHello);
        let peeked = tokio::time::timeout(self.peek_timeout, self.peeker.peek(client)).await;
        let (hello, client) = match peeked {
            Ok(Ok(peeked)) => peeked,
            Ok(Err(e)) => {
                self.metrics.record_hello_failure();
                warn!(step = %state.current(), error = %e, "Failed to extract ClientHello");
                state.advance(ConnectionState::Closed);
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.record_hello_timeout();
                warn!(
                    step = %state.current(),
                    timeout_ms = self.peek_timeout.as_millis() as u64,
                    "ClientHello deadline expired"
                );
                state.advance(ConnectionState::Closed);
                return Err(ProxyError::PeekTimeout(self.peek_timeout));
            }
        };
        state.advance(ConnectionState::HelloExtracted);

        if hello.server_name.is_empty() {
            self.metrics.record_hello_failure();
            warn!(step = %state.current(), "ClientHello carries no server name");
            state.advance(ConnectionState::Closed);
            return Err(ProxyError::NoServerName);
        }

        let target = join_host_port(&hello.server_name, self.listen_port);
        let span = tracing::Span::current();
        span.record("server_name", hello.server_name.as_str());
        span.record("backend", target.as_str());
        debug!(
            server_name = %hello.server_name,
            alpn = ?hello.alpn_protocols,
            "ClientHello extracted"
        );

        state.advance(ConnectionState::Dialing);
        let backend = match self.dialer.dial(Network::Tcp, &target).await {
            Ok(backend) => backend,
            Err(e) => {
                self.metrics.record_dial_failure();
                warn!(step = %state.current(), backend = %target, error = %e, "Failed to dial backend");
                state.advance(ConnectionState::Closed);
                return Err(ProxyError::Dial {
                    target,
                    source: e,
                });
            }
        };

        state.advance(ConnectionState::Relaying);
        let stats = relay(client, backend).await;
        self.metrics
            .record_relay(stats.to_backend, stats.from_backend);
        debug!(
            backend = %target,
            to_backend = stats.to_backend,
            from_backend = stats.from_backend,
            "Relay finished"
        );

        state.advance(ConnectionState::Closed);
        Ok(stats)
    }
}
