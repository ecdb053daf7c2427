//! HTTP request handlers for the gateway API.

use crate::api::auth::extract_bearer;
use crate::api::models::{ModelList, ProxyRequest};
use crate::api::streaming::sse_response;
use crate::core::access_log::AccessLog;
use crate::core::logging::{generate_request_id, get_request_id, NAMESPACE_CONTEXT};
use crate::core::middleware::RouteLabels;
use crate::core::{AppError, Result};
use crate::services::relay::{relay_once, relay_stream, RelayRequest};
use crate::services::{Endpoint, Resolver};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

/// Shared application state. Built once at startup and never mutated.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub access_log: Arc<dyn AccessLog>,
}

impl AppState {
    pub fn new(resolver: Resolver, access_log: Arc<dyn AccessLog>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            access_log,
        }
    }
}

/// Handle chat completion requests.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    proxy(state, headers, body, Endpoint::ChatCompletions).await
}

/// Handle legacy completions endpoint.
pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    proxy(state, headers, body, Endpoint::Completions).await
}

/// Authorize, resolve and relay one completion call.
///
/// The body is only parsed after the token is accepted, so unauthenticated callers learn
/// nothing about routing.
async fn proxy(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
    endpoint: Endpoint,
) -> Result<Response> {
    state.resolver.authorize(extract_bearer(&headers))?;
    let request = ProxyRequest::from_bytes(&body)?;
    let route = state.resolver.route(&request.model)?;

    let request_id = match get_request_id() {
        id if id.is_empty() => generate_request_id(),
        id => id,
    };
    let labels = RouteLabels {
        namespace: route.namespace.clone(),
        model: route.model.clone(),
    };

    tracing::debug!(
        request_id = %request_id,
        namespace = %route.namespace,
        model = %route.model,
        client = route.client.kind(),
        stream = request.stream,
        "Relaying {}",
        endpoint.api_path()
    );

    let stream = request.stream;
    let relay = RelayRequest {
        endpoint,
        request_id,
        payload: request.payload,
        route,
    };

    let result = NAMESPACE_CONTEXT
        .scope(labels.namespace.clone(), async move {
            if stream {
                relay_stream(relay, state.access_log.clone())
                    .await
                    .map(|stream| sse_response(stream).into_response())
            } else {
                relay_once(&relay, state.access_log.as_ref())
                    .await
                    .map(|body| Json(body).into_response())
            }
        })
        .await;

    let mut response = match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    response.extensions_mut().insert(labels);
    Ok(response)
}

/// List available models.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModelList>> {
    state.resolver.authorize(extract_bearer(&headers))?;

    tracing::debug!("Listing available models");
    Ok(Json(ModelList::new(state.resolver.routes().list_models())))
}

/// Liveness probe. No authentication, empty body.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler() -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::internal("MetricsEncodeError", e.to_string()))?;

    Ok((
        [(CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}
