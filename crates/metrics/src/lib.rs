//! Beacon - Metrics
//!
//! Statsd-style counters and timers with client-side sampling.
//!
//! Sampling rates are part of the edge's operational contract (host
//! counters at 1%, status codes at 0.1%), so the sampling gate lives in
//! the client rather than in the aggregator.
//!
//! # Example
//!
//! ```ignore
//! use beacon_metrics::{StatSink, StatsdClient};
//!
//! let stats = StatsdClient::new("127.0.0.1:8125", "edge")?;
//! stats.incr("status_code.204", 1, 0.001);
//! ```

mod statsd;

use std::sync::Arc;
use std::time::Duration;

pub use statsd::StatsdClient;

/// A destination for sampled counters and timers.
///
/// Implementations must be safe for concurrent use; recording is
/// best-effort and never fails the caller.
pub trait StatSink: Send + Sync {
    /// Increment a counter by `value`, sampled at `rate` (0.0..=1.0).
    fn incr(&self, name: &str, value: i64, rate: f32);

    /// Record a timing, sampled at `rate` (0.0..=1.0).
    fn timing(&self, name: &str, duration: Duration, rate: f32);
}

/// No-op sink for deployments without a statsd endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatSink for NoopStats {
    fn incr(&self, _name: &str, _value: i64, _rate: f32) {}

    fn timing(&self, _name: &str, _duration: Duration, _rate: f32) {}
}

impl<T: StatSink + ?Sized> StatSink for Arc<T> {
    fn incr(&self, name: &str, value: i64, rate: f32) {
        (**self).incr(name, value, rate);
    }

    fn timing(&self, name: &str, duration: Duration, rate: f32) {
        (**self).timing(name, duration, rate);
    }
}

/// Decide whether a sampled stat should be recorded this time.
pub(crate) fn sampled(rate: f32) -> bool {
    rate >= 1.0 || rand::random::<f32>() < rate
}
