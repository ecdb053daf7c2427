//! Error types and handling for the gateway.
//!
//! [`AppError`] is the only error that reaches the HTTP layer; every variant maps to one of
//! the structured bodies clients can rely on. [`ConfigError`] is fatal and only ever seen at
//! startup.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for request handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing, malformed, or unknown bearer token
    #[error("Invalid API key")]
    Unauthorized,

    /// The namespace part of the model identifier has no routes at all
    #[error("Namespace not found")]
    NamespaceNotFound,

    /// The namespace exists but does not serve the requested model
    #[error("Model not found")]
    ModelNotFound,

    /// Client provided a body the gateway cannot route
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Any failure on the provider call path
    #[error("{class}: {message}")]
    Internal { class: String, message: String },
}

impl AppError {
    pub fn internal(class: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Internal {
            class: class.into(),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NamespaceNotFound | AppError::ModelNotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Internal { class, message } => {
                tracing::error!(exception_class = %class, "Request failed: {}", message);
                json!({
                    "exception_class": class,
                    "exception_message": message,
                    "status": status.as_u16()
                })
            }
            AppError::BadRequest(msg) => json!({ "detail": msg }),
            other => json!({ "detail": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        AppError::internal(err.class_name(), err.to_string())
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

/// Startup configuration errors. None of these are recoverable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingEnv(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse route configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid provider #{index} in namespace `{namespace}`: {reason}")]
    InvalidProvider {
        namespace: String,
        index: usize,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load server settings: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Failures on the provider call path.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid upstream response: {0}")]
    Decode(String),

    #[error("malformed upstream event stream: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Stable name reported as `exception_class`.
    pub fn class_name(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "TransportError",
            ProviderError::Status { .. } => "UpstreamStatusError",
            ProviderError::Decode(_) => "DecodeError",
            ProviderError::Stream(_) => "StreamError",
        }
    }
}

/// Why no text could be extracted from a streamed chunk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk is not a JSON object")]
    NotAnObject,

    #[error("chunk has no `{0}` field")]
    MissingField(&'static str),

    #[error("chunk field `{field}` is not {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl ChunkError {
    pub fn class_name(&self) -> &'static str {
        match self {
            ChunkError::NotAnObject => "ChunkNotAnObject",
            ChunkError::MissingField(_) => "ChunkMissingField",
            ChunkError::WrongType { .. } => "ChunkWrongType",
        }
    }
}
