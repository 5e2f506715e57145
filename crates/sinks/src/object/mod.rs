//! Object Sink - rotating upload logger
//!
//! Line-oriented writer that appends events to a local spool file,
//! rotates the file by line count or age, and uploads sealed files to an
//! object store.
//!
//! # Architecture
//!
//! ```text
//! [handle.log()] --line--> [unbounded channel] --> [writer task]
//!                                                       | seal
//!                                                       v
//!                                              [upload workers (N=2)]
//!                                                       |
//!                                          [object store] + [notifier]
//! ```
//!
//! The writer owns the current file exclusively: every `log` call becomes
//! one complete line followed by a newline, and rotation only happens
//! between lines. A sealed file is never reopened for append.

mod keys;
mod upload;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use opendal::Operator;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use keys::KeyGenerator;

use crate::SinkError;
use crate::notify::Notifier;
use beacon_protocol::Event;
use upload::Uploader;

/// Formats an event as one spool line.
pub type LineFormatter = fn(&Event) -> Result<String, SinkError>;

/// Event formatter: the event's single-line JSON form.
pub fn json_line(event: &Event) -> Result<String, SinkError> {
    Ok(event.to_line()?)
}

/// Audit formatter: `[{unix_seconds}] {uuid}`.
pub fn audit_line(event: &Event) -> Result<String, SinkError> {
    Ok(event.audit_line())
}

/// Runtime configuration for an object sink.
#[derive(Debug, Clone)]
pub struct ObjectSinkConfig {
    /// Sink name, used in logs and spool file names
    pub name: String,

    /// Key prefix inside the destination bucket
    pub key_prefix: String,

    /// Seal the current file once it holds this many lines
    pub max_lines: usize,

    /// Seal the current file once it has been open this long
    pub max_age: Duration,

    /// Directory spool files are written to before upload
    pub logging_dir: PathBuf,

    /// Upload attempts per sealed file
    pub upload_attempts: usize,

    /// Concurrent upload workers
    pub upload_concurrency: usize,

    /// Writer flush / age-check interval
    pub flush_interval: Duration,

    /// Delay between upload retry attempts
    pub retry_delay: Duration,
}

impl Default for ObjectSinkConfig {
    fn default() -> Self {
        Self {
            name: "events".into(),
            key_prefix: String::new(),
            max_lines: 1_000_000,
            max_age: Duration::from_secs(10 * 60),
            logging_dir: PathBuf::from("."),
            upload_attempts: 3,
            upload_concurrency: 2,
            flush_interval: Duration::from_secs(1),
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Metrics for an object sink
#[derive(Debug, Default)]
pub struct ObjectSinkMetrics {
    /// Lines written to spool files
    pub lines_written: AtomicU64,

    /// Lines that failed to reach disk
    pub write_errors: AtomicU64,

    /// Files sealed and handed to the upload pool
    pub files_sealed: AtomicU64,

    /// Uploads that completed
    pub uploads_completed: AtomicU64,

    /// Uploads that exhausted their retries
    pub uploads_failed: AtomicU64,

    /// Individual retry attempts
    pub upload_retries: AtomicU64,

    /// Bytes uploaded
    pub bytes_uploaded: AtomicU64,
}

impl ObjectSinkMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            lines_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            files_sealed: AtomicU64::new(0),
            uploads_completed: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
            upload_retries: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_line(&self) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_sealed(&self) {
        self.files_sealed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_upload(&self, bytes: u64) {
        self.uploads_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    fn record_upload_retry(&self) {
        self.upload_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> ObjectMetricsSnapshot {
        ObjectMetricsSnapshot {
            lines_written: self.lines_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            files_sealed: self.files_sealed.load(Ordering::Relaxed),
            uploads_completed: self.uploads_completed.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            upload_retries: self.upload_retries.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of object sink metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMetricsSnapshot {
    pub lines_written: u64,
    pub write_errors: u64,
    pub files_sealed: u64,
    pub uploads_completed: u64,
    pub uploads_failed: u64,
    pub upload_retries: u64,
    pub bytes_uploaded: u64,
}

/// Producer-side handle: formats events and submits lines.
///
/// Submission never blocks; the channel is unbounded and the writer task
/// applies back-pressure only through disk throughput.
#[derive(Clone)]
pub struct ObjectSinkHandle {
    sender: mpsc::UnboundedSender<String>,
    format: LineFormatter,
    metrics: Arc<ObjectSinkMetrics>,
}

impl ObjectSinkHandle {
    /// Format and submit one event.
    pub fn log(&self, event: &Event) -> Result<(), SinkError> {
        let line = (self.format)(event)?;
        self.log_line(line)
    }

    /// Submit a pre-formatted line (used by the stream sink's fallback
    /// path, which already carries marshaled event bytes).
    pub fn log_line(&self, line: String) -> Result<(), SinkError> {
        self.sender.send(line).map_err(|_| SinkError::ChannelClosed)
    }

    /// Get snapshot of the sink's metrics.
    pub fn metrics_snapshot(&self) -> ObjectMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// The current open spool file.
struct SpoolFile {
    writer: BufWriter<File>,
    path: PathBuf,
    lines_written: usize,
    opened_at: Instant,
}

/// Object sink task: writer loop plus upload pool.
pub struct ObjectSink {
    config: ObjectSinkConfig,
    receiver: mpsc::UnboundedReceiver<String>,
    uploader: Uploader,
    cancel: CancellationToken,
    current: Option<SpoolFile>,
    spool_seq: u64,
    metrics: Arc<ObjectSinkMetrics>,
}

impl ObjectSink {
    /// Create an object sink and its producer handle.
    ///
    /// `operator` must be rooted at the destination bucket. The sink is
    /// inert until [`run`](Self::run) is spawned; `cancel` starts the
    /// drain-and-seal shutdown.
    pub fn new(
        config: ObjectSinkConfig,
        operator: Operator,
        notifier: Arc<dyn Notifier>,
        instance_id: &str,
        format: LineFormatter,
        cancel: CancellationToken,
    ) -> (Self, ObjectSinkHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let metrics = Arc::new(ObjectSinkMetrics::new());

        let name: Arc<str> = config.name.clone().into();
        let keys = KeyGenerator::new(config.key_prefix.clone(), instance_id);
        let uploader = Uploader::new(
            name,
            operator,
            notifier,
            keys,
            config.upload_attempts,
            config.retry_delay,
            config.upload_concurrency,
            Arc::clone(&metrics),
        );

        let handle = ObjectSinkHandle {
            sender,
            format,
            metrics: Arc::clone(&metrics),
        };

        let sink = Self {
            config,
            receiver,
            uploader,
            cancel,
            current: None,
            spool_seq: 0,
            metrics,
        };

        (sink, handle)
    }

    /// Run the sink until cancelled or all handles are dropped, then
    /// drain, seal the current file and wait for uploads.
    pub async fn run(mut self) -> ObjectMetricsSnapshot {
        tracing::info!(sink = %self.config.name, "object sink starting");

        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = self.receiver.recv() => match maybe {
                    Some(line) => self.write_line(&line),
                    None => break,
                },
                _ = ticker.tick() => self.tick(),
                _ = self.cancel.cancelled() => break,
            }
        }

        // Producers are gated by the fan-out's closed flag by now; drain
        // whatever is still queued before sealing.
        while let Ok(line) = self.receiver.try_recv() {
            self.write_line(&line);
        }
        self.seal_current();
        self.uploader.shutdown().await;

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            sink = %self.config.name,
            lines = snapshot.lines_written,
            sealed = snapshot.files_sealed,
            uploaded = snapshot.uploads_completed,
            upload_failures = snapshot.uploads_failed,
            "object sink shutting down"
        );
        snapshot
    }

    /// Append one complete line to the current file, rotating afterwards
    /// if the rotation predicate holds.
    fn write_line(&mut self, line: &str) {
        if self.current.is_none() {
            match self.open_spool_file() {
                Ok(file) => self.current = Some(file),
                Err(e) => {
                    self.metrics.record_write_error();
                    tracing::error!(sink = %self.config.name, error = %e, "failed to open spool file");
                    return;
                }
            }
        }

        let max_lines = self.config.max_lines;
        let max_age = self.config.max_age;
        let Some(file) = self.current.as_mut() else {
            return;
        };

        if let Err(e) = file
            .writer
            .write_all(line.as_bytes())
            .and_then(|()| file.writer.write_all(b"\n"))
        {
            self.metrics.record_write_error();
            tracing::error!(sink = %self.config.name, error = %e, "spool write failed");
            return;
        }

        file.lines_written += 1;
        self.metrics.record_line();

        if file.lines_written >= max_lines || file.opened_at.elapsed() >= max_age {
            self.seal_current();
        }
    }

    /// Periodic flush plus age-based rotation for quiet periods.
    fn tick(&mut self) {
        let max_age = self.config.max_age;
        let Some(file) = self.current.as_mut() else {
            return;
        };
        if let Err(e) = file.writer.flush() {
            tracing::error!(sink = %self.config.name, error = %e, "spool flush failed");
        }
        if file.opened_at.elapsed() >= max_age {
            self.seal_current();
        }
    }

    fn open_spool_file(&mut self) -> std::io::Result<SpoolFile> {
        std::fs::create_dir_all(&self.config.logging_dir)?;

        self.spool_seq += 1;
        let filename = format!(
            "{}_{}_{}.log",
            self.config.name,
            chrono::Utc::now().timestamp(),
            self.spool_seq
        );
        let path = self.config.logging_dir.join(filename);

        let file = File::options().create_new(true).append(true).open(&path)?;
        tracing::debug!(sink = %self.config.name, path = %path.display(), "opened spool file");

        Ok(SpoolFile {
            writer: BufWriter::new(file),
            path,
            lines_written: 0,
            opened_at: Instant::now(),
        })
    }

    /// Seal the current file and hand it to the upload pool.
    fn seal_current(&mut self) {
        let Some(mut file) = self.current.take() else {
            return;
        };

        if let Err(e) = file.writer.flush() {
            tracing::error!(sink = %self.config.name, error = %e, "flush on seal failed");
        }
        drop(file.writer);

        tracing::debug!(
            sink = %self.config.name,
            path = %file.path.display(),
            lines = file.lines_written,
            "spool file sealed"
        );
        self.metrics.record_sealed();
        self.uploader.submit(file.path);
    }
}

#[cfg(test)]
#[path = "object_test.rs"]
mod object_test;
