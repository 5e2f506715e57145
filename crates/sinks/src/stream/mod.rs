//! Stream Sink - batching producer
//!
//! Bounded in-memory buffer plus a single dispatcher task that publishes
//! batched records to a partitioned stream for near-real-time consumers.
//!
//! # Architecture
//!
//! ```text
//! [handle.log()] --record--> [bounded channel] --> [dispatcher]
//!        | blocks when full                            | batch of <=400
//!        v                                             v
//!   (back-pressure)                          [RecordStreamClient]
//!                                                      | exhausted retries
//!                                                      v
//!                                               [fallback sink]
//! ```
//!
//! The buffer never drops a record: producers block once capacity is
//! reached, retriable failures are re-enqueued at the head with their
//! attempt budget decremented, and records that exhaust the budget are
//! written to the fallback object sink. The first unrecoverable enqueue
//! error is latched and surfaced to every subsequent `log` call until the
//! sink is recreated.

mod transport;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub use transport::{PutError, RecordStreamClient, StreamRecord, TcpRecordStreamClient, TransportError};

use crate::SinkError;
use crate::object::ObjectSinkHandle;
use beacon_protocol::Event;

/// Runtime configuration for the stream sink.
#[derive(Debug, Clone)]
pub struct StreamSinkConfig {
    /// Downstream stream name
    pub stream_name: String,

    /// Bounded buffer capacity; producers block when full
    pub buffer_size: usize,

    /// Records per batched publish
    pub batch_size: usize,

    /// Flush pending records at least this often
    pub flush_interval: Duration,

    /// Publish attempts per record before falling back
    pub max_attempts: u32,

    /// Delay after a failed publish before the next attempt
    pub retry_delay: Duration,

    /// Bound on the synchronous drain during shutdown
    pub stop_timeout: Duration,
}

impl Default for StreamSinkConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            buffer_size: 10_000,
            batch_size: 400,
            flush_interval: Duration::from_secs(1),
            max_attempts: 10,
            retry_delay: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Metrics for the stream sink
#[derive(Debug, Default)]
pub struct StreamSinkMetrics {
    /// Records accepted into the buffer
    pub records_received: AtomicU64,

    /// Records published to the stream
    pub records_published: AtomicU64,

    /// Individual publish retries
    pub records_retried: AtomicU64,

    /// Records written to the fallback sink
    pub records_fallback: AtomicU64,

    /// Records lost (no fallback configured or fallback failed)
    pub records_lost: AtomicU64,

    /// Batched publish calls issued
    pub batches_published: AtomicU64,

    /// Whole-call publish failures
    pub publish_errors: AtomicU64,
}

impl StreamSinkMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_published: AtomicU64::new(0),
            records_retried: AtomicU64::new(0),
            records_fallback: AtomicU64::new(0),
            records_lost: AtomicU64::new(0),
            batches_published: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
        }
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            records_retried: self.records_retried.load(Ordering::Relaxed),
            records_fallback: self.records_fallback.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of stream sink metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamMetricsSnapshot {
    pub records_received: u64,
    pub records_published: u64,
    pub records_retried: u64,
    pub records_fallback: u64,
    pub records_lost: u64,
    pub batches_published: u64,
    pub publish_errors: u64,
}

/// Producer-side handle for submitting events to the stream.
#[derive(Clone)]
pub struct StreamSinkHandle {
    sender: mpsc::Sender<StreamRecord>,
    error: watch::Receiver<Option<String>>,
    max_attempts: u32,
    metrics: Arc<StreamSinkMetrics>,
}

impl StreamSinkHandle {
    /// Marshal and submit one event.
    ///
    /// Fails fast once the dispatcher has latched an unrecoverable error;
    /// otherwise blocks while the buffer is full (back-pressure, never
    /// drops).
    pub async fn log(&self, event: &Event) -> Result<(), SinkError> {
        {
            let latched = self.error.borrow();
            if let Some(message) = latched.as_ref() {
                return Err(SinkError::Stream(message.clone()));
            }
        }

        let data = Bytes::from(event.to_bytes()?);
        let record = StreamRecord {
            data,
            partition_key: format!("{:x}", rand::random::<u32>()),
            attempts_remaining: self.max_attempts,
        };

        self.sender
            .send(record)
            .await
            .map_err(|_| SinkError::ChannelClosed)
    }

    /// Get snapshot of the sink's metrics.
    pub fn metrics_snapshot(&self) -> StreamMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Stream sink dispatcher task.
pub struct StreamSink {
    config: StreamSinkConfig,
    receiver: mpsc::Receiver<StreamRecord>,
    client: Arc<dyn RecordStreamClient>,
    fallback: Option<ObjectSinkHandle>,
    cancel: CancellationToken,
    error_slot: watch::Sender<Option<String>>,
    metrics: Arc<StreamSinkMetrics>,
}

impl StreamSink {
    /// Create a stream sink and its producer handle.
    pub fn new(
        config: StreamSinkConfig,
        client: Arc<dyn RecordStreamClient>,
        fallback: Option<ObjectSinkHandle>,
        cancel: CancellationToken,
    ) -> (Self, StreamSinkHandle) {
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let (error_slot, error) = watch::channel(None);
        let metrics = Arc::new(StreamSinkMetrics::new());

        let handle = StreamSinkHandle {
            sender,
            error,
            max_attempts: config.max_attempts,
            metrics: Arc::clone(&metrics),
        };

        let sink = Self {
            config,
            receiver,
            client,
            fallback,
            cancel,
            error_slot,
            metrics,
        };

        (sink, handle)
    }

    /// Run the dispatcher until cancelled or all handles are dropped,
    /// then drain the buffer with a bounded timeout and hand survivors to
    /// the fallback sink.
    pub async fn run(mut self) -> StreamMetricsSnapshot {
        tracing::info!(stream = %self.config.stream_name, "stream sink starting");

        let mut pending: VecDeque<StreamRecord> = VecDeque::new();
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = self.receiver.recv() => match maybe {
                    Some(record) => {
                        self.metrics.records_received.fetch_add(1, Ordering::Relaxed);
                        pending.push_back(record);
                        if pending.len() >= self.config.batch_size {
                            self.flush(&mut pending).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending).await;
                    }
                }
                _ = self.cancel.cancelled() => break,
            }
        }

        // Closing: no new records are admitted, but everything already
        // buffered is still ours to deliver.
        self.receiver.close();
        while let Some(record) = self.receiver.recv().await {
            self.metrics.records_received.fetch_add(1, Ordering::Relaxed);
            pending.push_back(record);
        }

        let deadline = tokio::time::Instant::now() + self.config.stop_timeout;
        while !pending.is_empty() && tokio::time::Instant::now() < deadline {
            self.flush(&mut pending).await;
            if !pending.is_empty() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        for record in pending.drain(..) {
            self.send_to_fallback(record).await;
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            stream = %self.config.stream_name,
            received = snapshot.records_received,
            published = snapshot.records_published,
            fallback = snapshot.records_fallback,
            lost = snapshot.records_lost,
            "stream sink shutting down"
        );
        snapshot
    }

    /// Publish up to one batch from the head of the pending queue.
    ///
    /// Retriable failures are re-enqueued at the head in their original
    /// order; exhausted records go to the fallback sink.
    async fn flush(&mut self, pending: &mut VecDeque<StreamRecord>) {
        let take = pending.len().min(self.config.batch_size);
        let batch: Vec<StreamRecord> = pending.drain(..take).collect();

        let outcomes = match self.client.put_records(&self.config.stream_name, &batch).await {
            Ok(outcomes) if outcomes.len() == batch.len() => {
                self.metrics.batches_published.fetch_add(1, Ordering::Relaxed);
                outcomes
            }
            Ok(outcomes) => {
                tracing::error!(
                    stream = %self.config.stream_name,
                    expected = batch.len(),
                    got = outcomes.len(),
                    "stream service returned mismatched outcome count"
                );
                self.retry_whole_batch(batch, pending).await;
                return;
            }
            Err(e) => {
                self.metrics.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    stream = %self.config.stream_name,
                    records = batch.len(),
                    error = %e,
                    "batched publish failed"
                );
                self.retry_whole_batch(batch, pending).await;
                tokio::time::sleep(self.config.retry_delay).await;
                return;
            }
        };

        let mut requeue = Vec::new();
        for (mut record, outcome) in batch.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    self.metrics.records_published.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.retriable && record.attempts_remaining > 1 => {
                    self.metrics.records_retried.fetch_add(1, Ordering::Relaxed);
                    record.attempts_remaining -= 1;
                    requeue.push(record);
                }
                Err(e) => {
                    tracing::debug!(
                        stream = %self.config.stream_name,
                        error = %e.message,
                        retriable = e.retriable,
                        "record exhausted its attempts"
                    );
                    self.send_to_fallback(record).await;
                }
            }
        }
        for record in requeue.into_iter().rev() {
            pending.push_front(record);
        }
    }

    /// Re-enqueue a whole failed batch at the head, decrementing budgets.
    async fn retry_whole_batch(
        &mut self,
        batch: Vec<StreamRecord>,
        pending: &mut VecDeque<StreamRecord>,
    ) {
        let mut requeue = Vec::new();
        for mut record in batch {
            if record.attempts_remaining > 1 {
                self.metrics.records_retried.fetch_add(1, Ordering::Relaxed);
                record.attempts_remaining -= 1;
                requeue.push(record);
            } else {
                self.send_to_fallback(record).await;
            }
        }
        for record in requeue.into_iter().rev() {
            pending.push_front(record);
        }
    }

    /// Deliver an exhausted record to the fallback object sink.
    async fn send_to_fallback(&self, record: StreamRecord) {
        let Some(fallback) = &self.fallback else {
            self.metrics.records_lost.fetch_add(1, Ordering::Relaxed);
            self.latch_error("record exhausted retries with no fallback sink configured");
            return;
        };

        match String::from_utf8(record.data.to_vec()) {
            Ok(line) => match fallback.log_line(line) {
                Ok(()) => {
                    self.metrics.records_fallback.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.records_lost.fetch_add(1, Ordering::Relaxed);
                    self.latch_error(&format!("fallback sink rejected record: {e}"));
                }
            },
            Err(_) => {
                self.metrics.records_lost.fetch_add(1, Ordering::Relaxed);
                self.latch_error("record bytes are not valid UTF-8");
            }
        }
    }

    /// Latch the first unrecoverable error; later log calls fail fast.
    fn latch_error(&self, message: &str) {
        tracing::error!(stream = %self.config.stream_name, error = %message, "stream sink error");
        self.error_slot.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(message.to_string());
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
