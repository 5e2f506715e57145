//! UDP statsd client
//!
//! Fire-and-forget datagrams in the classic statsd wire format:
//! `prefix.name:value|c[|@rate]`. Send failures are swallowed; metrics
//! must never slow down or fail the request path.

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use crate::{StatSink, sampled};

/// Statsd client over a connected, non-blocking UDP socket.
#[derive(Debug)]
pub struct StatsdClient {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdClient {
    /// Connect to a statsd endpoint (`host:port`) with a metric prefix.
    pub fn new(hostport: &str, prefix: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(hostport)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            prefix: prefix.to_string(),
        })
    }

    fn send(&self, payload: &str) {
        if let Err(e) = self.socket.send(payload.as_bytes()) {
            tracing::trace!(error = %e, "statsd send failed");
        }
    }
}

impl StatSink for StatsdClient {
    fn incr(&self, name: &str, value: i64, rate: f32) {
        if !sampled(rate) {
            return;
        }
        let payload = if rate < 1.0 {
            format!("{}.{}:{}|c|@{}", self.prefix, name, value, rate)
        } else {
            format!("{}.{}:{}|c", self.prefix, name, value)
        };
        self.send(&payload);
    }

    fn timing(&self, name: &str, duration: Duration, rate: f32) {
        if !sampled(rate) {
            return;
        }
        let millis = duration.as_millis();
        let payload = if rate < 1.0 {
            format!("{}.{}:{}|ms|@{}", self.prefix, name, millis, rate)
        } else {
            format!("{}.{}:{}|ms", self.prefix, name, millis)
        };
        self.send(&payload);
    }
}

#[cfg(test)]
#[path = "statsd_test.rs"]
mod statsd_test;
