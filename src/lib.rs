//! OpenAI Gateway - a routing gateway for OpenAI-compatible APIs
//!
//! Presents a single chat/completions API and relays each call to one of several
//! configured back-ends, chosen by a `namespace/model` identifier:
//!
//! - **Direct providers**: one OpenAI-compatible or Azure OpenAI endpoint per entry
//! - **Weighted pools**: several API keys behind one base URL, drawn per call by weight
//! - **Streaming Support**: upstream chunks are forwarded as Server-Sent Events as they arrive
//! - **Access records**: one structured record per call, with accumulated stream text
//! - **Metrics & Monitoring**: Prometheus metrics for observability
//!
//! # Architecture
//!
//! - [`core`]: configuration, errors, access log, logging context, metrics, middleware
//! - [`services`]: provider clients, route table, resolver, relay engine
//! - [`api`]: HTTP handlers, models, SSE framing, router
//!
//! # Configuration
//!
//! Required environment variables:
//! - `CONFIG`: route configuration JSON (or `CONFIG_FILE`: path to it)
//! - `API_KEY_LIST`: comma-separated bearer tokens
//!
//! Optional environment variables:
//! - `HOST`: Server bind address (default: 0.0.0.0)
//! - `PORT`: Server port (default: 8000)
//! - `WORKERS`: Tokio worker threads (default: detected from cgroup CPU quota)
//! - `VERIFY_SSL`: Verify SSL certificates for upstream (default: true)
//! - `REQUEST_TIMEOUT_SECS`: Upstream timeout in seconds (default: 600)
//! - `ACCESS_LOG_DIR` / `ACCESS_LOG_ENABLED`: hourly access log files (default: logs / true)

pub mod api;
pub mod core;
pub mod services;

// Re-export commonly used types for convenience
pub use api::{build_router, AppState};
pub use core::{AppConfig, AppError, ConfigError, Result};
pub use services::{Resolver, RouteTable};
