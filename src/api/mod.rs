//! API layer for the gateway.
//!
//! This module contains the HTTP handlers, request/response models,
//! SSE framing and router assembly.

pub mod auth;
pub mod handlers;
pub mod models;
pub mod router;
pub mod streaming;

// Re-export commonly used types
pub use handlers::{chat_completions, completions, health, list_models, metrics_handler, AppState};
pub use models::{ModelInfo, ModelList, ProxyRequest};
pub use router::build_router;
pub use streaming::sse_response;
