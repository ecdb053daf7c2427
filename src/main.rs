//! OpenAI Gateway - Main entry point
//!
//! Loads configuration from the environment, builds the route table and serves the
//! gateway until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use chrono::Local;
use openai_gateway::{
    build_router,
    core::{
        init_metrics, AccessLog, AccessLogConfig, AccessLogger, AppConfig, ServerConfig,
    },
    services::{AuthTokenSet, Resolver, RouteTable},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Load .env file if present (before reading any environment variables)
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let worker_threads = config
        .server
        .workers
        .filter(|n| *n > 0)
        .unwrap_or_else(|| detect_cpu_limit().unwrap_or(1));

    println!("Tokio runtime: using {} worker threads", worker_threads);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Custom time formatter that uses local timezone (respects TZ environment variable)
struct LocalTime;

impl tracing_subscriber::fmt::time::FormatTime for LocalTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S"))
    }
}

fn init_tracing() {
    let no_color = std::env::var("NO_COLOR").is_ok();
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Noise suppression is appended even when RUST_LOG is set, otherwise a bare
    // "trace" lets hyper's per-frame logs through.
    let base_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,openai_gateway=debug".to_string());
    let filter_str = format!(
        "{},hyper=warn,hyper::proto=warn,h2=warn,reqwest=warn",
        base_filter
    );
    let filter = tracing_subscriber::EnvFilter::new(filter_str);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_timer(LocalTime))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_timer(LocalTime)
                    .with_ansi(!no_color),
            )
            .init();
    }
}

async fn async_main(config: AppConfig) -> Result<()> {
    init_tracing();
    init_metrics();

    let http_client = create_http_client(&config.server)?;

    let table = RouteTable::from_config(&config.gateway, &http_client)?;
    tracing::info!(
        "Loaded {} namespaces, {} advertised models",
        table.namespace_count(),
        table.list_models().len()
    );

    let tokens = AuthTokenSet::new(config.api_keys.iter().cloned());
    tracing::info!("Accepting {} API keys", tokens.len());
    let resolver = Resolver::new(tokens, table);

    let access_log = Arc::new(
        AccessLogger::new(AccessLogConfig {
            dir: config.server.access_log_dir.clone().into(),
            enabled: config.server.access_log_enabled,
            ..AccessLogConfig::default()
        })
        .await,
    );
    let shared_log: Arc<dyn AccessLog> = access_log.clone();

    let state = Arc::new(AppState::new(resolver, shared_log));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, flushing access log");
    access_log.flush().await;
    Ok(())
}

/// Create HTTP client with connection pooling
fn create_http_client(config: &ServerConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.verify_ssl)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .http2_keep_alive_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Detect CPU limit from cgroup (for containerized environments)
fn detect_cpu_limit() -> Option<usize> {
    // cgroup v2
    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        let mut parts = max.split_whitespace();
        if let (Some(quota), Some(period)) = (parts.next(), parts.next()) {
            if let Some(cores) = cores_from_quota(quota, period) {
                println!("Detected CPU limit from cgroup v2: {} cores", cores);
                return Some(cores);
            }
        }
    }

    // cgroup v1
    let quota = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us").ok()?;
    let period = std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us").ok()?;
    let cores = cores_from_quota(quota.trim(), period.trim())?;
    println!("Detected CPU limit from cgroup v1: {} cores", cores);
    Some(cores)
}

fn cores_from_quota(quota: &str, period: &str) -> Option<usize> {
    let quota = quota.parse::<i64>().ok()?;
    let period = period.parse::<i64>().ok()?;
    if quota > 0 && period > 0 {
        Some(((quota as f64 / period as f64).ceil() as usize).max(1))
    } else {
        None
    }
}
