//! Canonical edge event
//!
//! One [`Event`] per accepted tracking hit. Events are immutable once
//! built: the handler assembles all fields up front and the sinks only
//! ever serialize them.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single analytics hit, normalized at the edge.
///
/// Serialized as one JSON object; the object sink writes one event per
/// line, the stream sink publishes the same bytes as one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Wall-clock time the request entered the handler (nanosecond precision)
    pub received_at: DateTime<Utc>,

    /// Resolved source address: the last hop of the forwarded-for chain.
    /// `None` when the header was absent or unparseable.
    pub client_ip: Option<IpAddr>,

    /// The original forwarded-for header, verbatim
    pub forwarded_for: String,

    /// Fleet-unique identifier: `{instance_id}-{unix_seconds:08x}-{counter:08x}`
    pub uuid: String,

    /// Opaque payload: the base64-encoded JSON blob sent by the client
    pub data: String,

    /// HTTP User-Agent when the client opted in via `ua=1`, otherwise empty
    #[serde(default)]
    pub user_agent: String,

    /// Configured constant identifying this deployment
    pub edge_type: String,
}

impl Event {
    /// Assemble an event from parsed request fields.
    pub fn new(
        received_at: DateTime<Utc>,
        client_ip: Option<IpAddr>,
        forwarded_for: impl Into<String>,
        uuid: impl Into<String>,
        data: impl Into<String>,
        user_agent: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            received_at,
            client_ip,
            forwarded_for: forwarded_for.into(),
            uuid: uuid.into(),
            data: data.into(),
            user_agent: user_agent.into(),
            edge_type: edge_type.into(),
        }
    }

    /// Marshal the event to its single-line JSON form.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Marshal the event to JSON bytes for the stream sink.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// The audit line for this event: `[{unix_seconds}] {uuid}`.
    pub fn audit_line(&self) -> String {
        format!("[{}] {}", self.received_at.timestamp(), self.uuid)
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod event_test;
