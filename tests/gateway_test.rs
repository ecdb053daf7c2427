//! Integration tests for the gateway.
//!
//! These tests drive the full router against wiremock upstreams:
//! - Authentication ordering and error bodies
//! - Namespace/model resolution
//! - Unary and streamed relaying
//! - Access records
//! - Health and model listing

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use openai_gateway::{
    build_router,
    core::{
        init_metrics, AccessLog, AccessRecord, ChunkErrorRecord, GatewayConfig, Outcome,
    },
    services::{AuthTokenSet, Resolver, RouteTable},
    AppState,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "client-token";

#[derive(Default)]
struct CapturingLog {
    records: Mutex<Vec<AccessRecord>>,
    chunk_errors: Mutex<Vec<ChunkErrorRecord>>,
}

impl CapturingLog {
    fn records(&self) -> Vec<AccessRecord> {
        self.records.lock().unwrap().clone()
    }

    fn chunk_errors(&self) -> Vec<ChunkErrorRecord> {
        self.chunk_errors.lock().unwrap().clone()
    }
}

impl AccessLog for CapturingLog {
    fn record(&self, record: &AccessRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn chunk_error(&self, error: &ChunkErrorRecord) {
        self.chunk_errors.lock().unwrap().push(error.clone());
    }
}

/// Build a gateway with a `default` namespace and an `acct1` namespace, both pointing
/// at `upstream`.
fn create_test_app(upstream: &str) -> (Router, Arc<CapturingLog>) {
    init_metrics();

    let config = GatewayConfig::from_json(
        &json!({
            "namespace": {
                "default": [
                    {"type": "direct", "api_key": "sk-default", "base_url": format!("{}/v1", upstream), "models": ["gpt-x"]}
                ],
                "acct1": [
                    {"type": "weighted_pool", "base_url": format!("{}/v1", upstream), "api_keys": {"sk-pool": 1}, "models": ["gpt-x", "gpt-y"]}
                ]
            }
        })
        .to_string(),
    )
    .unwrap();

    let http = reqwest::Client::new();
    let table = RouteTable::from_config(&config, &http).unwrap();
    let resolver = Resolver::new(AuthTokenSet::new([TOKEN]), table);

    let log = Arc::new(CapturingLog::default());
    let shared: Arc<dyn AccessLog> = log.clone();
    let state = Arc::new(AppState::new(resolver, shared));
    (build_router(state), log)
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn sse_body(chunks: &[Value]) -> String {
    let mut body: String = chunks
        .iter()
        .map(|chunk| format!("data: {}\n\n", chunk))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn data_lines(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_health_is_open_and_empty() {
    let (app, _) = create_test_app("http://127.0.0.1:9");

    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_missing_or_wrong_token_is_401() {
    let (app, log) = create_test_app("http://127.0.0.1:9");
    let body = r#"{"model": "gpt-x", "messages": []}"#;

    for token in [None, Some("wrong")] {
        let response = app
            .clone()
            .oneshot(post("/v1/chat/completions", token, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"detail": "Invalid API key"}));
    }

    let response = app.oneshot(get("/v1/models", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(log.records().is_empty());
}

#[tokio::test]
async fn test_auth_checked_before_body() {
    let (app, _) = create_test_app("http://127.0.0.1:9");

    let response = app
        .clone()
        .oneshot(post("/v1/completions", Some("wrong"), "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(post("/v1/completions", Some(TOKEN), "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("Invalid JSON body"));
}

#[tokio::test]
async fn test_unknown_namespace_and_model_are_404() {
    let (app, _) = create_test_app("http://127.0.0.1:9");

    let response = app
        .clone()
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "nope/gpt-x"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"detail": "Namespace not found"}));

    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "acct1/gpt-z"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"detail": "Model not found"}));
}

#[tokio::test]
async fn test_list_models() {
    let (app, _) = create_test_app("http://127.0.0.1:9");

    let response = app.oneshot(get("/v1/models", Some(TOKEN))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["gpt-x", "acct1/gpt-x", "acct1/gpt-y"]);

    let first = &body["data"][0];
    assert_eq!(first["object"], "model");
    assert_eq!(first["owned_by"], "default");
    assert!(first["created"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_unary_relay_default_namespace() {
    let upstream = MockServer::start().await;
    let completion = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}]
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_eq("authorization", "Bearer sk-default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion.clone()))
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let request = r#"{"model": "gpt-x", "messages": [{"role": "user", "content": "hi"}]}"#;
    let response = app
        .oneshot(post("/v1/chat/completions", Some(TOKEN), request))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await, completion);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].api, "/v1/chat/completions");
    assert_eq!(records[0].response, completion);
    assert_eq!(records[0].request["model"], "gpt-x");
    assert_eq!(records[0].chunk, None);
    assert_eq!(records[0].error, None);
}

#[tokio::test]
async fn test_namespaced_model_is_sent_bare() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(header_eq("authorization", "Bearer sk-pool"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": [{"text": "ok"}]})))
        .expect(1)
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let response = app
        .oneshot(post(
            "/v1/completions",
            Some(TOKEN),
            r#"{"model": "acct1/gpt-y", "prompt": "p"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = upstream.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["model"], "gpt-y");
    assert_eq!(sent["prompt"], "p");

    // The access record keeps what the client sent.
    assert_eq!(log.records()[0].request["model"], "acct1/gpt-y");
}

#[tokio::test]
async fn test_streamed_relay() {
    let upstream = MockServer::start().await;
    let chunks = vec![
        json!({"choices": [{"delta": {"role": "assistant"}}]}),
        json!({"choices": [{"delta": {"content": "Hel"}}]}),
        json!({"choices": [{"delta": {"content": "lo!"}}]}),
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
    ];
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&chunks)),
        )
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "stream": true, "messages": []}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let lines = data_lines(&body_bytes(response).await);
    assert_eq!(lines.len(), chunks.len() + 1);
    for (line, chunk) in lines.iter().zip(&chunks) {
        assert_eq!(&serde_json::from_str::<Value>(line).unwrap(), chunk);
    }
    assert_eq!(lines.last().unwrap(), "[DONE]");

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response, json!("Hello!"));
    assert_eq!(records[0].chunk, Some(chunks[3].clone()));
    assert_eq!(records[0].outcome, Some(Outcome::Completed));
    assert!(log.chunk_errors().is_empty());
}

#[tokio::test]
async fn test_malformed_chunk_is_forwarded_and_reported() {
    let upstream = MockServer::start().await;
    let chunks = vec![
        json!({"choices": [{"text": "a"}]}),
        json!({"unexpected": true}),
        json!({"choices": [{"text": "b"}]}),
    ];
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(&chunks)),
        )
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let response = app
        .oneshot(post(
            "/v1/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "stream": true, "prompt": "p"}"#,
        ))
        .await
        .unwrap();

    let lines = data_lines(&body_bytes(response).await);
    assert_eq!(lines.len(), 4);

    let errors = log.chunk_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].chunk_index, 1);
    assert_eq!(errors[0].exception_class, "ChunkMissingField");

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response, json!("ab"));
}

#[tokio::test]
async fn test_upstream_failure_is_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "messages": []}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["status"], 500);
    assert_eq!(body["exception_class"], "UpstreamStatusError");
    assert!(body["exception_message"]
        .as_str()
        .unwrap()
        .contains("503"));

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].error.is_some());
}

#[tokio::test]
async fn test_stream_open_failure_is_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;

    let (app, log) = create_test_app(&upstream.uri());
    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "stream": true}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Some(Outcome::UpstreamError));
    assert_eq!(records[0].chunk, Some(Value::Null));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = create_test_app("http://127.0.0.1:9");

    // Generate at least one labelled request first.
    let _ = app
        .clone()
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "acct1/gpt-z"}"#,
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("openai_gateway_"));
}

#[tokio::test]
async fn test_upstream_key_order_is_kept() {
    let upstream = MockServer::start().await;
    let unary = r#"{"id":"cmpl-1","object":"text_completion","choices":[{"text":"ok","index":0}]}"#;
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(unary),
        )
        .mount(&upstream)
        .await;
    let chunk = r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"hi"}}]}"#;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(format!("data: {}\n\ndata: [DONE]\n\n", chunk)),
        )
        .mount(&upstream)
        .await;

    let (app, _) = create_test_app(&upstream.uri());

    let response = app
        .clone()
        .oneshot(post(
            "/v1/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "prompt": "p"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(String::from_utf8(body_bytes(response).await).unwrap(), unary);

    let response = app
        .oneshot(post(
            "/v1/chat/completions",
            Some(TOKEN),
            r#"{"model": "gpt-x", "stream": true}"#,
        ))
        .await
        .unwrap();
    let lines = data_lines(&body_bytes(response).await);
    assert_eq!(lines, vec![chunk.to_string(), "[DONE]".to_string()]);
}
