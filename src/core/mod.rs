//! Core functionality for the gateway.
//!
//! This module contains fundamental components used throughout the application:
//! - Configuration management
//! - Error handling
//! - Access records, logging context and metrics
//! - HTTP middleware

pub mod access_log;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;

// Re-export commonly used types
pub use access_log::{AccessLog, AccessLogConfig, AccessLogger, AccessRecord, ChunkErrorRecord, Outcome};
pub use config::{AppConfig, GatewayConfig, ProviderConfig, ServerConfig};
pub use error::{AppError, ChunkError, ConfigError, ProviderError, Result};
pub use logging::{generate_request_id, get_request_id, REQUEST_ID};
pub use metrics::{get_metrics, init_metrics, Metrics};
pub use middleware::MetricsMiddleware;
