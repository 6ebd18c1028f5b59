use ssp::metrics::{Metrics, MetricsSnapshot};
use std::sync::atomic::Ordering;

#[test]
fn test_metrics_default() {
    let metrics = Metrics::default();
    assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
}

#[test]
fn test_connection_lifecycle_counters() {
    let metrics = Metrics::new();
    metrics.record_accept();
    metrics.record_accept();
    metrics.record_reject();
    assert_eq!(metrics.connections_active.load(Ordering::Relaxed), 2);

    metrics.record_close();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.connections_accepted, 2);
    assert_eq!(snapshot.connections_rejected, 1);
    assert_eq!(snapshot.connections_active, 1);
    assert_eq!(snapshot.connections_closed, 1);
}

#[test]
fn test_failure_and_relay_counters() {
    let metrics = Metrics::new();
    metrics.record_hello_failure();
    metrics.record_hello_timeout();
    metrics.record_dial_failure();
    metrics.record_relay(512, 4096);
    metrics.record_relay(10, 20);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.hello_failures, 1);
    assert_eq!(snapshot.hello_timeouts, 1);
    assert_eq!(snapshot.dial_failures, 1);
    assert_eq!(snapshot.relays_completed, 2);
    assert_eq!(snapshot.bytes_to_backend, 522);
    assert_eq!(snapshot.bytes_from_backend, 4116);
}

#[test]
fn test_clones_share_counters() {
    let metrics = Metrics::new();
    let clone = metrics.clone();
    clone.record_dial_failure();
    assert_eq!(metrics.snapshot().dial_failures, 1);
}

#[tokio::test]
async fn test_concurrent_updates() {
    let metrics = Metrics::new();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                metrics.record_accept();
                metrics.record_close();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.connections_accepted, 1000);
    assert_eq!(snapshot.connections_closed, 1000);
    assert_eq!(snapshot.connections_active, 0);
}

#[test]
fn test_snapshot_serializes() {
    let metrics = Metrics::new();
    metrics.record_relay(1, 2);
    let json = serde_json::to_value(metrics.snapshot()).unwrap();
    assert_eq!(json["relays_completed"], 1);
    assert_eq!(json["bytes_from_backend"], 2);
}
