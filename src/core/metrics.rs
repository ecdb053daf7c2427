//! Prometheus metrics for monitoring the gateway.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, GaugeVec, HistogramVec,
    IntCounterVec,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, endpoint, namespace, model, and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds (until headers are sent)
    pub request_duration: HistogramVec,

    /// Number of currently active requests by endpoint
    pub active_requests: GaugeVec,

    /// Upstream latency until the first byte of the response, by provider kind
    pub upstream_latency: HistogramVec,

    /// Chunks relayed to clients
    pub stream_chunks: IntCounterVec,

    /// Chunks whose text could not be extracted
    pub chunk_errors: IntCounterVec,

    /// Weighted pool member selections
    pub pool_selections: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Safe to call repeatedly; every call returns the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "openai_gateway_requests_total",
            "Total number of requests",
            &["method", "endpoint", "namespace", "model", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "openai_gateway_request_duration_seconds",
            "Request duration in seconds",
            &["method", "endpoint", "namespace"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "openai_gateway_active_requests",
            "Number of active requests",
            &["endpoint"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_latency = register_histogram_vec!(
            "openai_gateway_upstream_latency_seconds",
            "Upstream response latency in seconds",
            &["provider_kind", "stream"],
            vec![0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]
        )
        .expect("Failed to register upstream_latency metric");

        let stream_chunks = register_int_counter_vec!(
            "openai_gateway_stream_chunks_total",
            "Streamed chunks relayed to clients",
            &["endpoint"]
        )
        .expect("Failed to register stream_chunks metric");

        let chunk_errors = register_int_counter_vec!(
            "openai_gateway_chunk_errors_total",
            "Streamed chunks whose text could not be extracted",
            &["endpoint"]
        )
        .expect("Failed to register chunk_errors metric");

        let pool_selections = register_int_counter_vec!(
            "openai_gateway_pool_selections_total",
            "Weighted pool member selections",
            &["pool", "member"]
        )
        .expect("Failed to register pool_selections metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_latency,
            stream_chunks,
            chunk_errors,
            pool_selections,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}
