//! Queue-based logging shared by both roles
//!
//! Neither role writes to the terminal. Every `tracing` event is turned into
//! a [`LogRecord`] by [`QueueLayer`] and pushed onto a [`LogQueue`]; a single
//! [`LogListener`] thread drains the queue into a [`LogSink`], so lines from
//! different roles never interleave mid-line and appear in arrival order.
//!
//! ```text
//!   scanner (this process)          checker (child process)
//!   ┌──────────────────┐           ┌──────────────────┐
//!   │ QueueLayer       │           │ QueueLayer       │
//!   └────────┬─────────┘           └────────┬─────────┘
//!            │                              │ LogQueue → JsonLinesSink
//!            │                              │ (stderr pipe)
//!            ▼                              ▼
//!   ┌─────────────────────────────────────────────────┐
//!   │                 LogQueue (parent)               │
//!   └────────────────────────┬────────────────────────┘
//!                            ▼
//!                 LogListener → StderrSink
//! ```

use crate::error::WorkerError;
use crate::walker::types::Message;
use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::EnvFilter;

/// Severity of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::ERROR => Severity::Error,
            Level::WARN => Severity::Warn,
            Level::INFO => Severity::Info,
            Level::DEBUG => Severity::Debug,
            Level::TRACE => Severity::Trace,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
            Severity::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// One log line, as produced by any role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub role: String,
    pub severity: Severity,
    pub message: String,
}

impl LogRecord {
    pub fn new(role: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            role: role.into(),
            severity,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.role,
            self.severity,
            self.message
        )
    }
}

/// Sender half of the log queue
pub type LogSender = Sender<Message<LogRecord>>;

/// Unbounded queue of log records with a single consumer
pub struct LogQueue {
    sender: LogSender,
    receiver: Receiver<Message<LogRecord>>,
}

impl LogQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> LogSender {
        self.sender.clone()
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Final destination of log records; only the listener thread touches it
pub trait LogSink: Send {
    fn write(&mut self, record: &LogRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Human-readable lines on stderr
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(io::stderr().lock(), "{}", record)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// One JSON record per line, used by the checker to ship records upstream
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> LogSink for JsonLinesSink<W> {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Collects records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, record: &LogRecord) -> io::Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

/// The single consumer of a [`LogQueue`]
pub struct LogListener {
    sender: LogSender,
    handle: Option<JoinHandle<()>>,
}

impl LogListener {
    /// Start draining `queue` into `sink` on a dedicated thread
    pub fn start(queue: &LogQueue, mut sink: Box<dyn LogSink>) -> Result<Self, WorkerError> {
        let receiver = queue.receiver.clone();
        let handle = thread::Builder::new()
            .name("log-listener".into())
            .spawn(move || {
                for msg in receiver.iter() {
                    match msg {
                        Message::Work(record) => {
                            // Nowhere left to report a failing sink
                            let _ = sink.write(&record);
                        }
                        Message::Shutdown => break,
                    }
                }
                let _ = sink.flush();
            })
            .map_err(|e| WorkerError::SpawnFailed {
                role: "log listener",
                reason: e.to_string(),
            })?;

        Ok(Self {
            sender: queue.sender(),
            handle: Some(handle),
        })
    }

    /// Drain everything queued so far, then stop the thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(Message::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for LogListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `tracing` layer that turns events into [`LogRecord`]s on a log queue
pub struct QueueLayer {
    role: &'static str,
    sender: LogSender,
}

impl QueueLayer {
    pub fn new(role: &'static str, sender: LogSender) -> Self {
        Self { role, sender }
    }
}

impl<S: Subscriber> Layer<S> for QueueLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord::new(
            self.role,
            Severity::from(event.metadata().level()),
            visitor.finish(),
        );
        // Listener already stopped; the record has nowhere to go
        let _ = self.sender.send(Message::Work(record));
    }
}

/// Collects the `message` field plus `key=value` pairs for the rest
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Default filter: our crate at info (debug when verbose), others at warn
pub fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("writable_dirs=debug,warn")
    } else {
        EnvFilter::new("writable_dirs=info,warn")
    }
}

/// Subscriber that routes every event of `role` onto the log queue
pub fn subscriber(
    role: &'static str,
    sender: LogSender,
    verbose: bool,
) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(QueueLayer::new(role, sender))
}
