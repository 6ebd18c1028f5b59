/// Connection counters shared by the listener, supervisors and stats endpoint
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for proxied connections
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Connections accepted by the listener
    pub connections_accepted: Arc<AtomicU64>,
    /// Connections dropped because the connection limit was reached
    pub connections_rejected: Arc<AtomicU64>,
    /// Connections currently handled
    pub connections_active: Arc<AtomicU64>,
    /// Connections fully closed
    pub connections_closed: Arc<AtomicU64>,
    /// ClientHello extraction failures (not counting timeouts)
    pub hello_failures: Arc<AtomicU64>,
    /// ClientHello deadlines that expired
    pub hello_timeouts: Arc<AtomicU64>,
    /// Backend dial failures
    pub dial_failures: Arc<AtomicU64>,
    /// Relays that ran to completion
    pub relays_completed: Arc<AtomicU64>,
    /// Bytes copied from clients to backends, replayed hello included
    pub bytes_to_backend: Arc<AtomicU64>,
    /// Bytes copied from backends to clients
    pub bytes_from_backend: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reject(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hello_failure(&self) {
        self.hello_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hello_timeout(&self) {
        self.hello_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relay(&self, to_backend: u64, from_backend: u64) {
        self.relays_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_to_backend.fetch_add(to_backend, Ordering::Relaxed);
        self.bytes_from_backend
            .fetch_add(from_backend, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            hello_failures: self.hello_failures.load(Ordering::Relaxed),
            hello_timeouts: self.hello_timeouts.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            relays_completed: self.relays_completed.load(Ordering::Relaxed),
            bytes_to_backend: self.bytes_to_backend.load(Ordering::Relaxed),
            bytes_from_backend: self.bytes_from_backend.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Metrics`], served by the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub hello_failures: u64,
    pub hello_timeouts: u64,
    pub dial_failures: u64,
    pub relays_completed: u64,
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}
