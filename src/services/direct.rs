//! Client for a single endpoint/credential pair.
//!
//! Speaks the OpenAI HTTP protocol either against an OpenAI-compatible base URL or against
//! an Azure OpenAI resource, where the model name selects the deployment.

use crate::core::config::{DirectConfig, DirectFlavor, UpstreamTarget};
use crate::core::error::{ConfigError, ProviderError};
use crate::core::logging::{get_namespace_context, get_request_id};
use crate::core::metrics::get_metrics;
use crate::services::client::{ChunkStream, Endpoint, ProviderClient};
use crate::services::sse::{SseData, SseParser};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::time::Instant;

pub struct DirectClient {
    http: reqwest::Client,
    target: UpstreamTarget,
    api_key: String,
}

impl DirectClient {
    pub fn new(http: reqwest::Client, target: UpstreamTarget, api_key: impl Into<String>) -> Self {
        Self {
            http,
            target,
            api_key: api_key.into(),
        }
    }

    /// OpenAI-compatible client for `base_url`.
    pub fn openai(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self::new(
            http,
            UpstreamTarget::OpenAi {
                base_url: base_url.into(),
            },
            api_key,
        )
    }

    pub fn from_config(
        config: &DirectConfig,
        flavor: DirectFlavor,
        http: reqwest::Client,
    ) -> Result<Self, ConfigError> {
        let target = config.target(flavor).map_err(ConfigError::Invalid)?;
        Ok(Self::new(http, target, config.api_key.clone()))
    }

    /// Full request URL for `endpoint`.
    pub fn url(&self, endpoint: Endpoint, body: &Value) -> String {
        match &self.target {
            UpstreamTarget::OpenAi { base_url } => {
                format!("{}{}", base_url.trim_end_matches('/'), endpoint.path())
            }
            UpstreamTarget::Azure {
                endpoint: azure_endpoint,
                api_version,
            } => {
                let deployment = body.get("model").and_then(Value::as_str).unwrap_or_default();
                format!(
                    "{}/openai/deployments/{}{}?api-version={}",
                    azure_endpoint.trim_end_matches('/'),
                    deployment,
                    endpoint.path(),
                    api_version
                )
            }
        }
    }

    fn request(&self, endpoint: Endpoint, body: &Value) -> reqwest::RequestBuilder {
        let builder = self.http.post(self.url(endpoint, body));
        let builder = match &self.target {
            UpstreamTarget::OpenAi { .. } => builder.bearer_auth(&self.api_key),
            UpstreamTarget::Azure { .. } => builder.header("api-key", &self.api_key),
        };
        builder.json(body)
    }

    async fn send(
        &self,
        endpoint: Endpoint,
        body: &Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let start = Instant::now();
        let response = self.request(endpoint, body).send().await?;
        get_metrics()
            .upstream_latency
            .with_label_values(&[self.kind(), if stream { "true" } else { "false" }])
            .observe(start.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                request_id = %get_request_id(),
                namespace = %get_namespace_context(),
                "Upstream {} returned {}",
                endpoint.path(),
                status
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderClient for DirectClient {
    fn kind(&self) -> &'static str {
        "direct"
    }

    async fn respond(&self, endpoint: Endpoint, body: &Value) -> Result<Value, ProviderError> {
        let response = self.send(endpoint, body, false).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    async fn respond_stream(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<ChunkStream, ProviderError> {
        let response = self.send(endpoint, body, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = SseParser::new();
            let mut done = false;

            while !done {
                let events = match bytes.next().await {
                    Some(Ok(chunk)) => parser.feed(&chunk),
                    Some(Err(e)) => {
                        yield Err(ProviderError::Transport(e));
                        break;
                    }
                    None => {
                        done = true;
                        parser.finish().into_iter().collect()
                    }
                };

                for event in events {
                    match event {
                        SseData::Done => {
                            done = true;
                            break;
                        }
                        SseData::Message(data) => match serde_json::from_str::<Value>(&data) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(e) => {
                                yield Err(ProviderError::Stream(format!(
                                    "event data is not JSON: {}",
                                    e
                                )));
                                done = true;
                                break;
                            }
                        },
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(chunks: &[Value]) -> String {
        let mut body = String::new();
        for chunk in chunks {
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_openai_url() {
        let client = DirectClient::openai(reqwest::Client::new(), "http://localhost:9/v1/", "k");
        assert_eq!(
            client.url(Endpoint::ChatCompletions, &json!({"model": "gpt-x"})),
            "http://localhost:9/v1/chat/completions"
        );
    }

    #[test]
    fn test_azure_url() {
        let client = DirectClient::new(
            reqwest::Client::new(),
            UpstreamTarget::Azure {
                endpoint: "https://r.openai.azure.com/".into(),
                api_version: "2024-02-15-preview".into(),
            },
            "k",
        );
        assert_eq!(
            client.url(Endpoint::Completions, &json!({"model": "gpt-4o"})),
            "https://r.openai.azure.com/openai/deployments/gpt-4o/completions?api-version=2024-02-15-preview"
        );
    }

    #[tokio::test]
    async fn test_respond_sends_bearer_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-x"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cmpl-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DirectClient::openai(
            reqwest::Client::new(),
            format!("{}/v1", server.uri()),
            "sk-test",
        );
        let response = client
            .respond(Endpoint::ChatCompletions, &json!({"model": "gpt-x"}))
            .await
            .unwrap();
        assert_eq!(response, json!({"id": "cmpl-1"}));
    }

    #[tokio::test]
    async fn test_azure_uses_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-02-15-preview"))
            .and(header("api-key", "az-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DirectClient::new(
            reqwest::Client::new(),
            UpstreamTarget::Azure {
                endpoint: server.uri(),
                api_version: "2024-02-15-preview".into(),
            },
            "az-key",
        );
        let response = client
            .respond(Endpoint::ChatCompletions, &json!({"model": "gpt-4o"}))
            .await
            .unwrap();
        assert_eq!(response["ok"], true);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = DirectClient::openai(reqwest::Client::new(), server.uri(), "k");
        let err = client
            .respond(Endpoint::Completions, &json!({"model": "m"}))
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Status { status: 429, ref body } if body == "slow down");
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_until_done() {
        let chunks = vec![
            json!({"choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
        ];
        let mut body = sse_body(&chunks);
        // anything after [DONE] is ignored
        body.push_str("data: {\"late\": true}\n\n");

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = DirectClient::openai(reqwest::Client::new(), server.uri(), "k");
        let stream = client
            .respond_stream(Endpoint::ChatCompletions, &json!({"model": "m", "stream": true}))
            .await
            .unwrap();
        let received: Vec<Value> = stream.try_collect().await.unwrap();
        assert_eq!(received, chunks);
    }

    #[tokio::test]
    async fn test_stream_non_json_event_ends_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {\"choices\": []}\n\ndata: not-json\n\n"),
            )
            .mount(&server)
            .await;

        let client = DirectClient::openai(reqwest::Client::new(), server.uri(), "k");
        let stream = client
            .respond_stream(Endpoint::Completions, &json!({"model": "m"}))
            .await
            .unwrap();
        let items: Vec<Result<Value, ProviderError>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_matches!(items[1], Err(ProviderError::Stream(_)));
    }
}
