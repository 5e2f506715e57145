//! Per-request context
//!
//! Mutable while a request is serviced: phase timers, the bad-client
//! flag, per-sink attempt outcomes and the final status. Flushed to
//! statsd once the response is written.

use std::time::{Duration, Instant};

use beacon_metrics::StatSink;
use chrono::{DateTime, Utc};

/// Sampling rate for per-request timers and sink attempt counters
const REQUEST_STAT_SAMPLING_RATE: f32 = 0.1;

/// Per-request servicing state.
#[derive(Debug)]
pub struct RequestContext {
    /// Wall-clock time the request entered the handler
    pub now: DateTime<Utc>,

    /// Request method
    pub method: String,

    /// Request path, or the FourOhFour tag for unknown paths
    pub endpoint: String,

    /// Header the client IP is resolved from
    pub ip_header: &'static str,

    /// Client POSTed a raw body with a misleading content type
    pub bad_client: bool,

    /// Named phase durations, in recording order
    pub timers: Vec<(&'static str, Duration)>,

    /// Final response status
    pub status: u16,

    /// Per-sink attempt outcomes: (sink name, accepted)
    pub attempts: Vec<(&'static str, bool)>,
}

impl RequestContext {
    /// Create a context stamped with the request entry time.
    pub fn new(now: DateTime<Utc>, method: &str, endpoint: &str, ip_header: &'static str) -> Self {
        Self {
            now,
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            ip_header,
            bad_client: false,
            timers: Vec::with_capacity(5),
            status: 0,
            attempts: Vec::with_capacity(2),
        }
    }

    /// Record a named phase duration.
    pub fn record_timer(&mut self, name: &'static str, duration: Duration) {
        self.timers.push((name, duration));
    }

    /// Record one sink's attempt outcome.
    pub fn record_attempt(&mut self, sink: &'static str, accepted: bool) {
        self.attempts.push((sink, accepted));
    }

    /// Flush timers and attempt outcomes to statsd.
    pub fn record_stats(&self, stats: &dyn StatSink) {
        for (name, duration) in &self.timers {
            stats.timing(
                &format!("request_time.{name}"),
                *duration,
                REQUEST_STAT_SAMPLING_RATE,
            );
        }
        for (sink, accepted) in &self.attempts {
            let outcome = if *accepted { "success" } else { "fail" };
            stats.incr(
                &format!("logger_attempt.{sink}.{outcome}"),
                1,
                REQUEST_STAT_SAMPLING_RATE,
            );
        }
        if self.bad_client {
            stats.incr("bad_client", 1, REQUEST_STAT_SAMPLING_RATE);
        }
    }
}

/// Stopwatch for phase timers: each stop yields the time since the last.
#[derive(Debug)]
pub struct TimerInstance {
    last: Instant,
}

impl TimerInstance {
    /// Start a new stopwatch.
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Duration since the previous stop (or creation), then reset.
    pub fn stop_timing(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        elapsed
    }
}

impl Default for TimerInstance {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "context_test.rs"]
mod context_test;
