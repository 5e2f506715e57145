//! HTTP source metrics
//!
//! Atomic counters for the ops endpoint; the statsd emissions live with
//! the request context.

use std::sync::atomic::{AtomicU64, Ordering};

/// HTTP source metrics
#[derive(Debug, Default)]
pub struct HttpSourceMetrics {
    /// Total HTTP requests received
    pub requests_total: AtomicU64,

    /// Successful requests (2xx)
    pub requests_success: AtomicU64,

    /// Client errors (4xx)
    pub requests_client_error: AtomicU64,

    /// Server errors (5xx)
    pub requests_server_error: AtomicU64,

    /// Events accepted into the sinks
    pub events_accepted: AtomicU64,

    /// Events produced by the large-payload split path
    pub events_split: AtomicU64,

    /// Request body bytes received
    pub bytes_received: AtomicU64,

    /// Requests flagged as bad clients
    pub bad_clients: AtomicU64,
}

impl HttpSourceMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_client_error: AtomicU64::new(0),
            requests_server_error: AtomicU64::new(0),
            events_accepted: AtomicU64::new(0),
            events_split: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bad_clients: AtomicU64::new(0),
        }
    }

    /// Record a request received
    #[inline]
    pub fn request_received(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Classify a finished request by its status code
    #[inline]
    pub fn request_finished(&self, status: u16) {
        match status {
            200..=299 => self.requests_success.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.requests_client_error.fetch_add(1, Ordering::Relaxed),
            _ => self.requests_server_error.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record accepted events
    #[inline]
    pub fn events_accepted(&self, count: u64) {
        self.events_accepted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record events produced by the split path
    #[inline]
    pub fn events_split(&self, count: u64) {
        self.events_split.fetch_add(count, Ordering::Relaxed);
    }

    /// Record request body bytes
    #[inline]
    pub fn bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a bad-client request
    #[inline]
    pub fn bad_client(&self) {
        self.bad_clients.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_client_error: self.requests_client_error.load(Ordering::Relaxed),
            requests_server_error: self.requests_server_error.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_split: self.events_split.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bad_clients: self.bad_clients.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of HTTP source metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpMetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_client_error: u64,
    pub requests_server_error: u64,
    pub events_accepted: u64,
    pub events_split: u64,
    pub bytes_received: u64,
    pub bad_clients: u64,
}
