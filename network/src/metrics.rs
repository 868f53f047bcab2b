//! Server-wide gossip counters.
//!
//! Plain atomics so the hot paths never lock. The node samples them into
//! its Prometheus registry.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub all_transactions: AtomicU64,
    pub new_transactions: AtomicU64,
    pub known_transactions: AtomicU64,
    pub stale_transactions: AtomicU64,
    pub invalid_transactions: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub received_transaction_requests: AtomicU64,
    pub received_milestone_requests: AtomicU64,
    pub received_heartbeats: AtomicU64,
    pub received_messages: AtomicU64,
    pub sent_packets: AtomicU64,
    pub dropped_send_packets: AtomicU64,
    pub dropped_processed_transactions: AtomicU64,
}

/// Point-in-time copy of [`ServerMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerMetricsSnapshot {
    pub all_transactions: u64,
    pub new_transactions: u64,
    pub known_transactions: u64,
    pub stale_transactions: u64,
    pub invalid_transactions: u64,
    pub invalid_requests: u64,
    pub received_transaction_requests: u64,
    pub received_milestone_requests: u64,
    pub received_heartbeats: u64,
    pub received_messages: u64,
    pub sent_packets: u64,
    pub dropped_send_packets: u64,
    pub dropped_processed_transactions: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ServerMetricsSnapshot {
            all_transactions: load(&self.all_transactions),
            new_transactions: load(&self.new_transactions),
            known_transactions: load(&self.known_transactions),
            stale_transactions: load(&self.stale_transactions),
            invalid_transactions: load(&self.invalid_transactions),
            invalid_requests: load(&self.invalid_requests),
            received_transaction_requests: load(&self.received_transaction_requests),
            received_milestone_requests: load(&self.received_milestone_requests),
            received_heartbeats: load(&self.received_heartbeats),
            received_messages: load(&self.received_messages),
            sent_packets: load(&self.sent_packets),
            dropped_send_packets: load(&self.dropped_send_packets),
            dropped_processed_transactions: load(&self.dropped_processed_transactions),
        }
    }
}
