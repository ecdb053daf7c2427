//! Executes a resolved call and emits its access record.
//!
//! Unary calls return the upstream body untouched. Streamed calls forward every upstream
//! chunk as soon as it arrives and accumulate its text afterwards; the accumulation only
//! feeds the access record and never shapes what the caller receives.

use crate::core::access_log::{
    round_secs, AccessLog, AccessRecord, ChunkErrorRecord, Outcome,
};
use crate::core::error::{AppError, ChunkError, ProviderError};
use crate::core::metrics::get_metrics;
use crate::services::client::Endpoint;
use crate::services::resolver::ResolvedRoute;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Terminal data payload sent after the last upstream chunk.
pub const DONE_MARKER: &str = "[DONE]";

/// Everything needed to run one call.
pub struct RelayRequest {
    pub endpoint: Endpoint,
    pub request_id: String,
    /// Client payload as received
    pub payload: Value,
    pub route: ResolvedRoute,
}

impl RelayRequest {
    /// Payload sent upstream: the client payload with `model` replaced by the bare model name.
    pub fn upstream_body(&self) -> Value {
        let mut body = self.payload.clone();
        if let Some(object) = body.as_object_mut() {
            object.insert("model".to_string(), Value::String(self.route.model.clone()));
        }
        body
    }
}

/// Running concatenation of per-chunk text fragments.
#[derive(Debug)]
pub struct TextAccumulator {
    endpoint: Endpoint,
    text: String,
}

impl TextAccumulator {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            text: String::new(),
        }
    }

    /// Append the chunk's fragment. On error the text is left unchanged.
    pub fn push(&mut self, chunk: &Value) -> Result<(), ChunkError> {
        let fragment = self.endpoint.extract_text(chunk)?;
        self.text.push_str(&fragment);
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Single-shot call. Exactly one access record is written, success or not.
pub async fn relay_once(request: &RelayRequest, log: &dyn AccessLog) -> Result<Value, AppError> {
    let start = Instant::now();
    let body = request.upstream_body();
    let result = request.route.client.respond(request.endpoint, &body).await;

    let (response, error) = match &result {
        Ok(response) => (response.clone(), None),
        Err(e) => (Value::Null, Some(e.to_string())),
    };
    log.record(&AccessRecord {
        api: request.endpoint.api_path().to_string(),
        request_id: request.request_id.clone(),
        request: request.payload.clone(),
        response,
        chunk: None,
        time: round_secs(start.elapsed()),
        outcome: None,
        error,
    });

    result.map_err(AppError::from)
}

/// Open a streamed call.
///
/// The upstream stream is established before returning, so connection and status
/// failures become an error response rather than a broken event stream. The returned
/// stream yields one JSON text per upstream chunk, in order, then [`DONE_MARKER`] if the
/// upstream finished cleanly.
pub async fn relay_stream(
    request: RelayRequest,
    log: Arc<dyn AccessLog>,
) -> Result<impl Stream<Item = String> + Send + 'static, AppError> {
    let start = Instant::now();
    let body = request.upstream_body();
    let opened = request
        .route
        .client
        .respond_stream(request.endpoint, &body)
        .await;

    let mut recorder = StreamRecorder::new(request, log, start);
    let mut upstream = match opened {
        Ok(upstream) => upstream,
        Err(e) => {
            recorder.finish(Outcome::UpstreamError, Some(&e));
            return Err(e.into());
        }
    };

    Ok(async_stream::stream! {
        let mut failed = false;
        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    let data = chunk.to_string();
                    recorder.hold(chunk);
                    yield data;
                    recorder.absorb();
                }
                Err(e) => {
                    tracing::warn!(
                        request_id = %recorder.request_id,
                        "Upstream stream failed after {} chunks: {}",
                        recorder.chunks,
                        e
                    );
                    recorder.finish(Outcome::UpstreamError, Some(&e));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            recorder.finish(Outcome::Completed, None);
            yield DONE_MARKER.to_string();
        }
    })
}

/// Per-stream accounting. Logs exactly once: on completion, on upstream failure, or,
/// if the caller goes away first, when the stream is dropped.
struct StreamRecorder {
    endpoint: Endpoint,
    request_id: String,
    payload: Value,
    log: Arc<dyn AccessLog>,
    start: Instant,
    accumulator: TextAccumulator,
    /// Forwarded but not yet accumulated
    pending: Option<Value>,
    last_chunk: Option<Value>,
    chunks: usize,
    finished: bool,
}

impl StreamRecorder {
    fn new(request: RelayRequest, log: Arc<dyn AccessLog>, start: Instant) -> Self {
        Self {
            endpoint: request.endpoint,
            request_id: request.request_id,
            payload: request.payload,
            log,
            start,
            accumulator: TextAccumulator::new(request.endpoint),
            pending: None,
            last_chunk: None,
            chunks: 0,
            finished: false,
        }
    }

    fn hold(&mut self, chunk: Value) {
        self.pending = Some(chunk);
    }

    fn absorb(&mut self) {
        let Some(chunk) = self.pending.take() else {
            return;
        };
        let api = self.endpoint.api_path();
        get_metrics()
            .stream_chunks
            .with_label_values(&[api])
            .inc();

        if let Err(e) = self.accumulator.push(&chunk) {
            get_metrics().chunk_errors.with_label_values(&[api]).inc();
            self.log.chunk_error(&ChunkErrorRecord {
                api: api.to_string(),
                request_id: self.request_id.clone(),
                request: self.payload.clone(),
                exception_class: e.class_name().to_string(),
                exception_message: e.to_string(),
                chunk_index: self.chunks,
            });
        }

        self.chunks += 1;
        self.last_chunk = Some(chunk);
    }

    fn finish(&mut self, outcome: Outcome, error: Option<&ProviderError>) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.log.record(&AccessRecord {
            api: self.endpoint.api_path().to_string(),
            request_id: self.request_id.clone(),
            request: self.payload.clone(),
            response: Value::String(self.accumulator.text().to_string()),
            chunk: Some(self.last_chunk.take().unwrap_or(Value::Null)),
            time: round_secs(self.start.elapsed()),
            outcome: Some(outcome),
            error: error.map(|e| e.to_string()),
        });
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                request_id = %self.request_id,
                "Client disconnected after {} chunks",
                self.chunks
            );
            self.absorb();
            self.finish(Outcome::ClientDisconnected, None);
        }
    }
}
