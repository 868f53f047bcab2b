//! Prometheus metrics for the Tangle node.
//!
//! The gossip layer counts into plain atomics ([`ServerMetrics`]); the
//! [`NodeMetrics`] registry samples them, together with peering and request
//! queue gauges, whenever [`NodeMetrics::observe`] runs.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};
use tangle_network::{PeeringManager, RequestQueue, ServerMetricsSnapshot};

/// Central collection of all node-level Prometheus metrics.
pub struct NodeMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Gossip (sampled from ServerMetrics) ─────────────────────────────
    pub all_transactions: IntGauge,
    pub new_transactions: IntGauge,
    pub known_transactions: IntGauge,
    pub stale_transactions: IntGauge,
    pub invalid_transactions: IntGauge,
    pub invalid_requests: IntGauge,
    pub received_messages: IntGauge,
    pub sent_packets: IntGauge,
    pub dropped_send_packets: IntGauge,
    pub dropped_processed_transactions: IntGauge,

    // ── Peering and requests ────────────────────────────────────────────
    /// Current number of connected neighbors.
    pub connected_peers: IntGauge,
    /// Requests waiting to be asked for.
    pub requests_queued: IntGauge,
    /// Requests asked for and not yet answered.
    pub requests_pending: IntGauge,
    /// Rolling average request latency, in milliseconds.
    pub request_latency_ms: IntGauge,

    // ── Confirmation ────────────────────────────────────────────────────
    /// Milestones confirmed by this node.
    pub milestones_confirmed: IntCounter,
    /// Bundles applied by White-Flag confirmation.
    pub confirmed_bundles: IntCounter,
    /// Time spent computing White-Flag mutations, in milliseconds.
    pub white_flag_time_ms: Histogram,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    register_int_gauge_with_registry!(Opts::new(name, help), registry)
        .expect("failed to register gauge")
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let milestones_confirmed = register_int_counter_with_registry!(
            Opts::new(
                "tangle_milestones_confirmed_total",
                "Milestones confirmed by this node"
            ),
            registry
        )
        .expect("failed to register milestones_confirmed counter");

        let confirmed_bundles = register_int_counter_with_registry!(
            Opts::new(
                "tangle_confirmed_bundles_total",
                "Bundles applied by milestone confirmation"
            ),
            registry
        )
        .expect("failed to register confirmed_bundles counter");

        // 1 ms → ~8 s.
        let white_flag_time_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "tangle_white_flag_time_ms",
                "Time spent computing White-Flag mutations"
            )
            .buckets(prometheus::exponential_buckets(1.0, 2.0, 14).unwrap_or_default()),
            registry
        )
        .expect("failed to register white_flag_time_ms histogram");

        Self {
            all_transactions: gauge(&registry, "tangle_all_transactions", "Transactions received"),
            new_transactions: gauge(&registry, "tangle_new_transactions", "New transactions received"),
            known_transactions: gauge(&registry, "tangle_known_transactions", "Already known transactions received"),
            stale_transactions: gauge(&registry, "tangle_stale_transactions", "Stale transactions received"),
            invalid_transactions: gauge(&registry, "tangle_invalid_transactions", "Invalid transactions received"),
            invalid_requests: gauge(&registry, "tangle_invalid_requests", "Malformed requests received"),
            received_messages: gauge(&registry, "tangle_received_messages", "Messages received from neighbors"),
            sent_packets: gauge(&registry, "tangle_sent_packets", "Messages written to neighbors"),
            dropped_send_packets: gauge(&registry, "tangle_dropped_send_packets", "Messages dropped on full send queues"),
            dropped_processed_transactions: gauge(&registry, "tangle_dropped_processed_transactions", "Validated transactions nobody consumed"),
            connected_peers: gauge(&registry, "tangle_connected_peers", "Current number of connected neighbors"),
            requests_queued: gauge(&registry, "tangle_requests_queued", "Requests waiting to be sent"),
            requests_pending: gauge(&registry, "tangle_requests_pending", "Requests awaiting an answer"),
            request_latency_ms: gauge(&registry, "tangle_request_latency_ms", "Average request latency"),
            milestones_confirmed,
            confirmed_bundles,
            white_flag_time_ms,
            registry,
        }
    }

    /// Sample the gossip counters and queue sizes into the registry.
    pub fn observe(
        &self,
        server: &ServerMetricsSnapshot,
        request_queue: &RequestQueue,
        peering: &PeeringManager,
    ) {
        let set = |g: &IntGauge, v: u64| g.set(i64::try_from(v).unwrap_or(i64::MAX));
        set(&self.all_transactions, server.all_transactions);
        set(&self.new_transactions, server.new_transactions);
        set(&self.known_transactions, server.known_transactions);
        set(&self.stale_transactions, server.stale_transactions);
        set(&self.invalid_transactions, server.invalid_transactions);
        set(&self.invalid_requests, server.invalid_requests);
        set(&self.received_messages, server.received_messages);
        set(&self.sent_packets, server.sent_packets);
        set(&self.dropped_send_packets, server.dropped_send_packets);
        set(&self.dropped_processed_transactions, server.dropped_processed_transactions);

        let (queued, pending) = request_queue.size();
        set(&self.requests_queued, queued as u64);
        set(&self.requests_pending, pending as u64);
        set(
            &self.request_latency_ms,
            request_queue.avg_latency().as_millis() as u64,
        );
        set(&self.connected_peers, peering.connected_count() as u64);
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "cannot encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
