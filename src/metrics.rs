//! Client-side metrics.
//!
//! A fixed set of relaxed atomics bumped from the hot path. Reading
//! goes through [`ClientMetrics::snapshot`]; exporters that want
//! metric names use [`MetricsSnapshot::export_pairs`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the cache client.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    operations: AtomicU64,
    retries: AtomicU64,
    transport_failures: AtomicU64,
    hosts_disconnected: AtomicU64,
    hosts_reconnected: AtomicU64,
    expirations_received: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ClientMetrics {
    /// Create a fresh metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A facade operation started.
    pub(crate) fn record_operation(&self) {
        bump(&self.operations);
    }

    /// An operation was rerouted after a transport failure.
    pub(crate) fn record_retry(&self) {
        bump(&self.retries);
    }

    /// A host call failed with a transport error.
    pub(crate) fn record_transport_failure(&self) {
        bump(&self.transport_failures);
    }

    /// A host was taken offline.
    pub(crate) fn record_host_disconnected(&self) {
        bump(&self.hosts_disconnected);
    }

    /// A host came back online.
    pub(crate) fn record_host_reconnected(&self) {
        bump(&self.hosts_reconnected);
    }

    /// A host pushed an expiration notification for one key.
    pub(crate) fn record_expiration(&self) {
        bump(&self.expirations_received);
    }

    /// Take a point-in-time view of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self.operations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            hosts_disconnected: self.hosts_disconnected.load(Ordering::Relaxed),
            hosts_reconnected: self.hosts_reconnected.load(Ordering::Relaxed),
            expirations_received: self.expirations_received.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of all client counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Facade operations started.
    pub operations: u64,
    /// Routing retries after transport failures.
    pub retries: u64,
    /// Transport failures observed by the facade.
    pub transport_failures: u64,
    /// Host disconnect transitions.
    pub hosts_disconnected: u64,
    /// Host reconnect transitions.
    pub hosts_reconnected: u64,
    /// Expiration notifications received from hosts.
    pub expirations_received: u64,
}

impl MetricsSnapshot {
    /// The counters as `(metric name, value)` pairs, for handing to an
    /// exporter.
    pub fn export_pairs(&self) -> [(&'static str, u64); 6] {
        [
            ("cache_client_operations_total", self.operations),
            ("cache_client_retries_total", self.retries),
            (
                "cache_client_transport_failures_total",
                self.transport_failures,
            ),
            (
                "cache_client_hosts_disconnected_total",
                self.hosts_disconnected,
            ),
            (
                "cache_client_hosts_reconnected_total",
                self.hosts_reconnected,
            ),
            (
                "cache_client_expirations_received_total",
                self.expirations_received,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recordings() {
        let metrics = ClientMetrics::new();
        metrics.record_operation();
        metrics.record_retry();
        metrics.record_retry();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations, 1);
        assert_eq!(snapshot.retries, 3);
        assert_eq!(snapshot.transport_failures, 0);
    }

    #[test]
    fn test_export_pairs_carry_names() {
        let metrics = ClientMetrics::new();
        metrics.record_expiration();

        let pairs = metrics.snapshot().export_pairs();
        assert_eq!(pairs.len(), 6);
        assert!(pairs
            .iter()
            .any(|&(name, value)| name == "cache_client_expirations_received_total" && value == 1));
        assert!(pairs.iter().all(|(name, _)| name.ends_with("_total")));
    }
}
