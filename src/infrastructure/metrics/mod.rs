//! Prometheus Metrics Module
//!
//! Gateway-wide metrics collection.
//!
//! # Metrics Collected
//! - Active WebSocket connection gauge
//! - Inbound gateway events by type
//! - Message pipeline operations by kind

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active WebSocket connections gauge
pub static GATEWAY_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new(
            "gateway_connections_active",
            "Number of active WebSocket connections",
        )
        .namespace("chat_gateway"),
    )
    .expect("Failed to create GATEWAY_CONNECTIONS_ACTIVE metric")
});

/// Inbound gateway event counter, labeled by event type
pub static GATEWAY_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_events_total", "Total inbound gateway events")
            .namespace("chat_gateway"),
        &["event"],
    )
    .expect("Failed to create GATEWAY_EVENTS_TOTAL metric")
});

/// Message pipeline operation counter, labeled by operation and outcome
pub static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("messages_total", "Message pipeline operations").namespace("chat_gateway"),
        &["op", "outcome"],
    )
    .expect("Failed to create MESSAGES_TOTAL metric")
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(GATEWAY_CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register GATEWAY_CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(GATEWAY_EVENTS_TOTAL.clone()))
        .expect("Failed to register GATEWAY_EVENTS_TOTAL");
    registry
        .register(Box::new(MESSAGES_TOTAL.clone()))
        .expect("Failed to register MESSAGES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to record a message pipeline operation
pub fn record_message_op(op: &str, outcome: &str) {
    MESSAGES_TOTAL.with_label_values(&[op, outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_metrics() {
        GATEWAY_CONNECTIONS_ACTIVE.set(3);
        GATEWAY_EVENTS_TOTAL.with_label_values(&["heartbeat"]).inc();
        record_message_op("send", "ok");

        let output = gather_metrics();
        assert!(output.contains("chat_gateway_gateway_connections_active"));
        assert!(output.contains("chat_gateway_gateway_events_total"));
        assert!(output.contains("chat_gateway_messages_total"));
    }
}
