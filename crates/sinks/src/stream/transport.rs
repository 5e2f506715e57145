//! Record stream transport
//!
//! The seam between the batching dispatcher and the concrete stream
//! service. The bundled client speaks a length-prefixed TCP protocol to a
//! stream gateway; cloud-native producers implement the same trait.
//!
//! # Wire format (TCP client)
//!
//! ```text
//! [4 bytes: frame length (big-endian)]
//! [2 bytes: stream name length][stream name]
//! [2 bytes: partition key length][partition key]
//! [record bytes]
//! ```

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// One record bound for the partitioned stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Marshaled event bytes
    pub data: Bytes,

    /// Hex-encoded random partition key, uniformly distributed
    pub partition_key: String,

    /// Publish attempts left before the record goes to the fallback sink
    pub attempts_remaining: u32,
}

/// Per-record publish failure.
#[derive(Debug, Clone)]
pub struct PutError {
    /// Human-readable failure description
    pub message: String,

    /// Whether the dispatcher should retry this record
    pub retriable: bool,
}

/// Whole-call transport failure; every record in the batch is treated as
/// retriable.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Write failed
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// The service returned a malformed response
    #[error("malformed response: {0}")]
    Protocol(String),
}

/// A destination stream service accepting batched records.
#[async_trait]
pub trait RecordStreamClient: Send + Sync {
    /// Publish a batch. Returns one outcome per record (same order) on a
    /// completed call, or a transport error when the whole call failed.
    async fn put_records(
        &self,
        stream: &str,
        records: &[StreamRecord],
    ) -> Result<Vec<Result<(), PutError>>, TransportError>;
}

/// TCP client publishing length-prefixed record frames to a stream
/// gateway over a persistent connection.
pub struct TcpRecordStreamClient {
    target: String,
    connection: Mutex<Option<TcpStream>>,
    connection_timeout: Duration,
    write_timeout: Duration,
    tcp_keepalive: bool,
    tcp_keepalive_interval: Duration,
}

impl TcpRecordStreamClient {
    /// Create a client for the given `host:port` target.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            connection: Mutex::new(None),
            connection_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            tcp_keepalive: true,
            tcp_keepalive_interval: Duration::from_secs(30),
        }
    }

    /// Set connection timeout
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set write timeout
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Enable or disable TCP keep-alive
    #[must_use]
    pub fn with_tcp_keepalive(mut self, enabled: bool) -> Self {
        self.tcp_keepalive = enabled;
        self
    }

    /// Connect (or reconnect) to the target.
    async fn connect(&self) -> Result<(), TransportError> {
        let mut conn = self.connection.lock().await;

        if let Some(stream) = conn.take() {
            let _ = stream.into_std();
        }

        let connect_result = timeout(
            self.connection_timeout,
            TcpStream::connect(&self.target),
        )
        .await;

        let stream = match connect_result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    target: self.target.clone(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    target: self.target.clone(),
                    source: std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY, continuing");
        }

        if self.tcp_keepalive {
            let sock_ref = SockRef::from(&stream);
            let keepalive = TcpKeepalive::new().with_time(self.tcp_keepalive_interval);

            #[cfg(target_os = "linux")]
            let keepalive = keepalive.with_interval(self.tcp_keepalive_interval);

            if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
                tracing::debug!(error = %e, "failed to set TCP keep-alive, continuing");
            }
        }

        tracing::debug!(target = %self.target, "connected to stream gateway");
        *conn = Some(stream);
        Ok(())
    }

    /// Send one length-prefixed record frame.
    async fn send_record(&self, stream_name: &str, record: &StreamRecord) -> Result<(), TransportError> {
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or_else(|| TransportError::Connect {
            target: self.target.clone(),
            source: std::io::Error::new(ErrorKind::NotConnected, "no connection"),
        })?;

        let frame = encode_frame(stream_name, record);

        let write_result = timeout(self.write_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await;

        match write_result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                *conn = None;
                Err(TransportError::Write(e))
            }
            Err(_) => {
                *conn = None;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}

#[async_trait]
impl RecordStreamClient for TcpRecordStreamClient {
    async fn put_records(
        &self,
        stream: &str,
        records: &[StreamRecord],
    ) -> Result<Vec<Result<(), PutError>>, TransportError> {
        if !self.is_connected().await {
            self.connect().await?;
        }

        let mut outcomes = Vec::with_capacity(records.len());
        let mut broken = false;

        for record in records {
            if broken {
                outcomes.push(Err(PutError {
                    message: "connection lost earlier in batch".into(),
                    retriable: true,
                }));
                continue;
            }

            match self.send_record(stream, record).await {
                Ok(()) => outcomes.push(Ok(())),
                Err(e) => {
                    outcomes.push(Err(PutError {
                        message: e.to_string(),
                        retriable: true,
                    }));
                    // One reconnect attempt; if that fails too, the rest
                    // of the batch is reported retriable without writes.
                    if self.connect().await.is_err() {
                        broken = true;
                    }
                }
            }
        }

        Ok(outcomes)
    }
}

/// Encode one record frame (see module docs for the layout).
fn encode_frame(stream_name: &str, record: &StreamRecord) -> Vec<u8> {
    let body_len = 2 + stream_name.len() + 2 + record.partition_key.len() + record.data.len();
    let mut frame = Vec::with_capacity(4 + body_len);
    frame.extend_from_slice(&(body_len as u32).to_be_bytes());
    frame.extend_from_slice(&(stream_name.len() as u16).to_be_bytes());
    frame.extend_from_slice(stream_name.as_bytes());
    frame.extend_from_slice(&(record.partition_key.len() as u16).to_be_bytes());
    frame.extend_from_slice(record.partition_key.as_bytes());
    frame.extend_from_slice(&record.data);
    frame
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
