//! Fan-out aggregate
//!
//! One `log` call fans an event out to every configured sink: the audit
//! sink, the object sink and the stream sink. Delivery is best-effort-
//! both: the call fails only when the sinks are shutting down or when no
//! event sink accepted the event.
//!
//! Shutdown is a one-shot gate: once closed, new `log` calls fail with
//! "processing halted" while in-flight calls are allowed to finish; the
//! lifecycle controller then drains the sink tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::SinkError;
use crate::object::ObjectSinkHandle;
use crate::stream::StreamSinkHandle;
use beacon_protocol::Event;

/// Per-sink outcome of one fan-out call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutReport {
    /// Object sink accepted the event
    pub object_ok: bool,

    /// Stream sink outcome; `None` when no stream sink is configured
    pub stream_ok: Option<bool>,

    /// Audit sink accepted the event
    pub audit_ok: bool,
}

/// The set of sinks every accepted event fans out to.
pub struct EdgeSinks {
    audit: ObjectSinkHandle,
    object: ObjectSinkHandle,
    stream: Option<StreamSinkHandle>,
    closed: AtomicBool,
    inflight: AtomicU64,
    idle: Notify,
}

impl EdgeSinks {
    /// Create the aggregate from per-sink handles.
    pub fn new(
        audit: ObjectSinkHandle,
        object: ObjectSinkHandle,
        stream: Option<StreamSinkHandle>,
    ) -> Self {
        Self {
            audit,
            object,
            stream,
            closed: AtomicBool::new(false),
            inflight: AtomicU64::new(0),
            idle: Notify::new(),
        }
    }

    /// Fan one event out to every sink.
    ///
    /// Returns the per-sink outcomes, or an error when the sinks are
    /// closed or no event sink accepted the event. A report with a failed
    /// sink is still a success for the caller (best-effort-both).
    pub async fn log(&self, event: &Event) -> Result<FanoutReport, SinkError> {
        self.inflight.fetch_add(1, Ordering::AcqRel);
        let result = self.log_inner(event).await;
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
        result
    }

    async fn log_inner(&self, event: &Event) -> Result<FanoutReport, SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Halted);
        }

        let audit_ok = match self.audit.log(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(uuid = %event.uuid, error = %e, "audit sink rejected event");
                false
            }
        };

        let object_ok = match self.object.log(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(uuid = %event.uuid, error = %e, "object sink rejected event");
                false
            }
        };

        let stream_ok = match &self.stream {
            Some(stream) => match stream.log(event).await {
                Ok(()) => Some(true),
                Err(e) => {
                    tracing::warn!(uuid = %event.uuid, error = %e, "stream sink rejected event");
                    Some(false)
                }
            },
            None => None,
        };

        if !object_ok && stream_ok != Some(true) {
            return Err(SinkError::AllSinksFailed);
        }

        Ok(FanoutReport {
            object_ok,
            stream_ok,
            audit_ok,
        })
    }

    /// Close the gate: refuse new `log` calls and wait for in-flight
    /// calls to finish. Returns `false` when already closed (second and
    /// later calls are no-ops).
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.wait_idle().await;
        true
    }

    /// Whether the gate has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod fanout_test;
