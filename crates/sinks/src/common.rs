//! Common types shared by all sinks

use thiserror::Error;

/// Errors surfaced to `log` callers on the request path.
///
/// Upload and publish failures are handled inside the sink tasks (retries,
/// notifications, fallback); only enqueue-side failures reach the handler.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sinks are shutting down; no new events are accepted
    #[error("processing halted")]
    Halted,

    /// Event could not be marshaled
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sink task has exited and its channel is closed
    #[error("sink channel closed")]
    ChannelClosed,

    /// The stream sink has observed an unrecoverable enqueue error;
    /// subsequent log calls fail fast until the sink is recreated
    #[error("stream sink failed: {0}")]
    Stream(String),

    /// Neither event sink accepted the event
    #[error("failed to store the event in any sink")]
    AllSinksFailed,
}
