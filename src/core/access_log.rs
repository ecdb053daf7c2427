//! Per-call access records.
//!
//! Every relayed call produces exactly one [`AccessRecord`]. Streamed calls can additionally
//! produce any number of [`ChunkErrorRecord`]s, one per chunk the accumulator could not
//! interpret. [`AccessLogger`] is the production sink: each entry goes to the `access`
//! tracing target and, when enabled, to hourly JSONL files written by a background task.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Serialized messages longer than this are replaced by a size marker.
pub const MAX_LOG_ENTRY_BYTES: usize = 131_072;

const FLUSH_BATCH: usize = 100;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    UpstreamError,
    ClientDisconnected,
}

/// One record per relayed call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRecord {
    /// Request path, e.g. `/v1/chat/completions`
    pub api: String,
    pub request_id: String,
    /// Client payload as received
    pub request: Value,
    /// Full body for unary calls, accumulated text for streams
    pub response: Value,
    /// Last upstream chunk of a stream. `Some(Value::Null)` when the stream yielded nothing;
    /// `None` for unary calls, which omits the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Value>,
    /// Wall-clock seconds, rounded to milliseconds
    pub time: f64,
    /// How a stream ended; unary calls leave it out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A chunk the text accumulator could not interpret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkErrorRecord {
    pub api: String,
    pub request_id: String,
    pub request: Value,
    pub exception_class: String,
    pub exception_message: String,
    /// Zero-based position of the chunk in the stream
    pub chunk_index: usize,
}

/// Round a duration to seconds with three decimals.
pub fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

/// Sink for access records.
///
/// Implementations must not block: they are called from inside response streams.
pub trait AccessLog: Send + Sync {
    fn record(&self, record: &AccessRecord);

    fn chunk_error(&self, error: &ChunkErrorRecord);
}

/// Serialize a message, substituting a size marker when it exceeds [`MAX_LOG_ENTRY_BYTES`].
pub fn bounded_message<T: Serialize>(message: &T) -> Value {
    match serde_json::to_string(message) {
        Ok(text) if text.len() > MAX_LOG_ENTRY_BYTES => json!({
            "error": "logging entity too long",
            "length": text.len()
        }),
        Ok(_) => serde_json::to_value(message).unwrap_or(Value::Null),
        Err(e) => json!({ "error": format!("unserializable log entity: {}", e) }),
    }
}

// ============================================================================
// File Writer
// ============================================================================

/// File output configuration
#[derive(Debug, Clone)]
pub struct AccessLogConfig {
    /// Directory that receives `YYYYMMDDHH.log` files
    pub dir: PathBuf,
    /// Whether records are written to files at all
    pub enabled: bool,
    /// Buffer size for the write channel
    pub buffer_size: usize,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            enabled: true,
            buffer_size: 1000,
        }
    }
}

#[derive(Debug)]
struct LogLine {
    level: &'static str,
    create_time: DateTime<Local>,
    message: Value,
}

impl LogLine {
    fn render(&self) -> String {
        json!({
            "name": "access",
            "level": self.level,
            "source": module_path!(),
            "create_time": self.create_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "message": self.message,
        })
        .to_string()
    }
}

enum WriterCommand {
    Line(LogLine),
    Flush(oneshot::Sender<()>),
}

/// Production [`AccessLog`]: tracing plus optional hourly JSONL files.
pub struct AccessLogger {
    sender: Option<mpsc::Sender<WriterCommand>>,
}

impl AccessLogger {
    /// Create a logger. File output is skipped if disabled or the directory is unusable.
    pub async fn new(config: AccessLogConfig) -> Self {
        if !config.enabled {
            tracing::info!("Access log files are disabled");
            return Self::tracing_only();
        }

        if let Err(e) = tokio::fs::create_dir_all(&config.dir).await {
            tracing::error!(
                "Failed to create access log directory {}: {}",
                config.dir.display(),
                e
            );
            return Self::tracing_only();
        }

        let (sender, receiver) = mpsc::channel::<WriterCommand>(config.buffer_size);
        let dir = config.dir.clone();
        tokio::spawn(async move {
            writer_task(receiver, dir).await;
        });

        tracing::info!("Access log files enabled in {}", config.dir.display());
        Self {
            sender: Some(sender),
        }
    }

    pub fn tracing_only() -> Self {
        Self { sender: None }
    }

    /// Wait until every line queued so far has been written.
    pub async fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if sender.send(WriterCommand::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    fn write(&self, level: &'static str, message: Value) {
        let Some(sender) = &self.sender else {
            return;
        };
        let line = LogLine {
            level,
            create_time: Local::now(),
            message,
        };
        if let Err(e) = sender.try_send(WriterCommand::Line(line)) {
            tracing::warn!("Failed to queue access log line: {}", e);
        }
    }
}

impl AccessLog for AccessLogger {
    fn record(&self, record: &AccessRecord) {
        let message = bounded_message(record);
        tracing::info!(
            target: "access",
            request_id = %record.request_id,
            api = %record.api,
            outcome = ?record.outcome,
            time = record.time,
            "{}",
            message
        );
        self.write("INFO", message);
    }

    fn chunk_error(&self, error: &ChunkErrorRecord) {
        let message = bounded_message(error);
        tracing::error!(
            target: "access",
            request_id = %error.request_id,
            exception_class = %error.exception_class,
            "{}",
            message
        );
        self.write("ERROR", message);
    }
}

fn hour_file_name(time: &DateTime<Local>) -> String {
    format!("{}.log", time.format("%Y%m%d%H"))
}

struct HourlyFile {
    dir: PathBuf,
    current: Option<(String, File)>,
}

impl HourlyFile {
    async fn write_batch(&mut self, batch: &mut Vec<LogLine>) {
        for line in batch.drain(..) {
            let name = hour_file_name(&line.create_time);
            let needs_open = !matches!(&self.current, Some((open, _)) if *open == name);
            if needs_open {
                self.rotate(name).await;
            }

            if let Some((_, file)) = self.current.as_mut() {
                let mut text = line.render();
                text.push('\n');
                if let Err(e) = file.write_all(text.as_bytes()).await {
                    tracing::error!("Failed to write access log line: {}", e);
                }
            }
        }

        if let Some((_, file)) = self.current.as_mut() {
            if let Err(e) = file.flush().await {
                tracing::error!("Failed to flush access log file: {}", e);
            }
        }
    }

    async fn rotate(&mut self, name: String) {
        if let Some((_, mut old)) = self.current.take() {
            let _ = old.flush().await;
        }
        let path = self.dir.join(&name);
        match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(file) => self.current = Some((name, file)),
            Err(e) => tracing::error!("Failed to open access log file {}: {}", path.display(), e),
        }
    }
}

/// Background task that writes lines to the current hour's file
async fn writer_task(mut receiver: mpsc::Receiver<WriterCommand>, dir: PathBuf) {
    let mut out = HourlyFile { dir, current: None };
    let mut buffer: Vec<LogLine> = Vec::with_capacity(FLUSH_BATCH);
    let mut flush_interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(WriterCommand::Line(line)) => {
                    buffer.push(line);
                    if buffer.len() >= FLUSH_BATCH {
                        out.write_batch(&mut buffer).await;
                    }
                }
                Some(WriterCommand::Flush(ack)) => {
                    out.write_batch(&mut buffer).await;
                    let _ = ack.send(());
                }
                // Every logger handle is gone
                None => {
                    out.write_batch(&mut buffer).await;
                    break;
                }
            },
            _ = flush_interval.tick() => {
                if !buffer.is_empty() {
                    out.write_batch(&mut buffer).await;
                }
            }
        }
    }

    tracing::info!("Access log writer task stopped");
}
