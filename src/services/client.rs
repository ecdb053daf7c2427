//! Provider client abstraction.
//!
//! A [`ProviderClient`] fulfils "send one request, get one response or a sequence of chunks"
//! for a single back-end. The gateway never looks inside the payloads beyond what the
//! [`Endpoint`] text rule needs for logging.

use crate::core::error::{ChunkError, ProviderError};
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Lazily produced upstream chunks. Finite and not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send>>;

/// Which OpenAI operation a call targets. Decided once per call from the inbound route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ChatCompletions,
    Completions,
}

impl Endpoint {
    /// Path relative to a provider base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "/chat/completions",
            Endpoint::Completions => "/completions",
        }
    }

    /// Path the gateway serves this endpoint on.
    pub fn api_path(&self) -> &'static str {
        match self {
            Endpoint::ChatCompletions => "/v1/chat/completions",
            Endpoint::Completions => "/v1/completions",
        }
    }

    /// Text fragment carried by one streamed chunk.
    ///
    /// Completions read `choices[0].text`; chat completions read `choices[0].delta.content`,
    /// where a null or absent `content` is an empty fragment.
    pub fn extract_text(&self, chunk: &Value) -> Result<String, ChunkError> {
        let object = chunk.as_object().ok_or(ChunkError::NotAnObject)?;
        let choices = object
            .get("choices")
            .ok_or(ChunkError::MissingField("choices"))?
            .as_array()
            .ok_or(ChunkError::WrongType {
                field: "choices",
                expected: "an array",
            })?;
        let first = choices
            .first()
            .ok_or(ChunkError::MissingField("choices[0]"))?;

        match self {
            Endpoint::Completions => match first.get("text") {
                Some(Value::String(text)) => Ok(text.clone()),
                Some(Value::Null) => Ok(String::new()),
                Some(_) => Err(ChunkError::WrongType {
                    field: "text",
                    expected: "a string",
                }),
                None => Err(ChunkError::MissingField("text")),
            },
            Endpoint::ChatCompletions => {
                let delta = first
                    .get("delta")
                    .ok_or(ChunkError::MissingField("delta"))?;
                if !delta.is_object() {
                    return Err(ChunkError::WrongType {
                        field: "delta",
                        expected: "an object",
                    });
                }
                match delta.get("content") {
                    Some(Value::String(content)) => Ok(content.clone()),
                    None | Some(Value::Null) => Ok(String::new()),
                    Some(_) => Err(ChunkError::WrongType {
                        field: "content",
                        expected: "a string",
                    }),
                }
            }
        }
    }
}

/// A back-end able to serve completion calls.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Short name of the client kind, used in logs and metrics.
    fn kind(&self) -> &'static str;

    /// Single-shot call returning the full response body.
    async fn respond(&self, endpoint: Endpoint, body: &Value) -> Result<Value, ProviderError>;

    /// Open a streamed call. Connection and status failures surface here, before any chunk.
    async fn respond_stream(
        &self,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<ChunkStream, ProviderError>;
}
