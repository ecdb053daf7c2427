//! HTTP middleware for request tracking and metrics.

use crate::core::logging::{generate_request_id, REQUEST_ID};
use crate::core::metrics::get_metrics;
use axum::{
    extract::{MatchedPath, Request},
    http::{header::CONTENT_TYPE, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Extension type for storing routing labels in the response
#[derive(Clone, Debug)]
pub struct RouteLabels {
    pub namespace: String,
    pub model: String,
}

/// Assigns a request id and runs the rest of the stack inside its scope.
pub async fn request_context(request: Request, next: Next) -> Response {
    let request_id = generate_request_id();
    let mut response = REQUEST_ID.scope(request_id.clone(), next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Middleware for tracking request metrics
pub struct MetricsMiddleware;

impl MetricsMiddleware {
    /// Track request metrics.
    ///
    /// For streamed responses the recorded duration is time to headers, since the body
    /// is still being produced when `next.run` returns.
    ///
    /// Series are labelled with the matched route template. Requests that match no route
    /// are passed through untracked so arbitrary paths cannot create new series.
    pub async fn track_metrics(request: Request, next: Next) -> Response {
        let Some(endpoint) = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
        else {
            return next.run(request).await;
        };
        let method = request.method().to_string();

        // Skip metrics endpoint itself to avoid recursion
        if endpoint == "/metrics" {
            return next.run(request).await;
        }

        let metrics = get_metrics();
        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .inc();

        let start = Instant::now();
        let response = next.run(request).await;
        let duration = start.elapsed().as_secs_f64();
        let status_code = response.status().as_u16().to_string();

        let (namespace, model) = response
            .extensions()
            .get::<RouteLabels>()
            .map(|l| (l.namespace.as_str(), l.model.as_str()))
            .unwrap_or(("unknown", "unknown"));

        // Only routed calls carry labels; /health and /v1/models are left out
        if namespace != "unknown" {
            metrics
                .request_count
                .with_label_values(&[&method, &endpoint, namespace, model, &status_code])
                .inc();
            metrics
                .request_duration
                .with_label_values(&[&method, &endpoint, namespace])
                .observe(duration);
        }

        let is_streaming = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if is_streaming {
            tracing::info!(
                "{} {} - status={} namespace={} model={} ttfb={:.3}s",
                method,
                endpoint,
                status_code,
                namespace,
                model,
                duration
            );
        } else {
            tracing::info!(
                "{} {} - status={} duration={:.3}s",
                method,
                endpoint,
                status_code,
                duration
            );
        }

        metrics
            .active_requests
            .with_label_values(&[&endpoint])
            .dec();

        response
    }
}
