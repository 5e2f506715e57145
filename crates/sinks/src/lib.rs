//! Beacon - Sinks
//!
//! Durable destinations for edge events. Every accepted event fans out to
//! an append-only object-storage sink (batch consumers) and a streaming
//! sink (near-real-time consumers), with an audit record alongside.
//!
//! # Architecture
//!
//! Each sink is a long-lived task fed through a channel by a cloneable
//! producer handle; the handler never touches files or sockets directly.
//!
//! ```text
//! [handler] --> [EdgeSinks.log] --+--> [audit object sink]   (unbounded)
//!                                 +--> [event object sink]   (unbounded)
//!                                 +--> [stream sink]         (bounded, blocks when full)
//! ```
//!
//! # Available Sinks
//!
//! | Sink | Purpose | Back-pressure |
//! |------|---------|---------------|
//! | `object` | Rotating spool files uploaded to an object store | None (unbounded) |
//! | `stream` | Batched publishes to a partitioned stream | Producers block when full |

// =============================================================================
// Sink implementations (each in its own submodule)
// =============================================================================

/// Object sink - rotating spool files uploaded to an object store
pub mod object;

/// Stream sink - bounded buffer with a batching dispatcher
pub mod stream;

/// Upload notifications (receipts and errors)
pub mod notify;

// =============================================================================
// Shared pieces
// =============================================================================

/// Fan-out aggregate tying the sinks together
mod fanout;

/// Common types shared by all sinks
mod common;

// =============================================================================
// Public re-exports
// =============================================================================

pub use common::SinkError;
pub use fanout::{EdgeSinks, FanoutReport};

pub use notify::{HttpNotifier, NoopNotifier, Notifier};
pub use object::{
    KeyGenerator, LineFormatter, ObjectMetricsSnapshot, ObjectSink, ObjectSinkConfig,
    ObjectSinkHandle, audit_line, json_line,
};
pub use stream::{
    PutError, RecordStreamClient, StreamMetricsSnapshot, StreamRecord, StreamSink,
    StreamSinkConfig, StreamSinkHandle, TcpRecordStreamClient, TransportError,
};
