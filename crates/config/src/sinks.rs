//! Sink configuration types
//!
//! Configuration for the object sinks (event and audit), the optional
//! stream sink, and the optional fallback sink the stream sink drains
//! into when records exhaust their retries.

use std::time::Duration;

use serde::Deserialize;

/// Default rotation line bound (1 million lines)
const DEFAULT_MAX_LINES: usize = 1_000_000;

/// Rotating object sink configuration.
///
/// # Example
///
/// ```json
/// {
///   "bucket": "beacon-events-prod",
///   "key_prefix": "events",
///   "max_lines": 1000000,
///   "max_age": "10m",
///   "storage": { "backend": "s3", "region": "us-west-2" },
///   "notifier": { "type": "http", "receipt_url": "https://queue/receipts" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectSinkConfig {
    /// Destination bucket (or root directory for the fs backend)
    pub bucket: String,

    /// Key prefix inside the bucket
    pub key_prefix: String,

    /// Seal the current file once it holds this many lines
    pub max_lines: usize,

    /// Seal the current file once it has been open this long
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Upload attempts per sealed file before giving up
    pub upload_attempts: usize,

    /// Concurrent upload workers
    pub upload_concurrency: usize,

    /// Writer flush / age-check interval
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Object store backend
    pub storage: StorageConfig,

    /// Upload notification transport
    pub notifier: NotifierConfig,
}

impl Default for ObjectSinkConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key_prefix: String::new(),
            max_lines: DEFAULT_MAX_LINES,
            max_age: Duration::from_secs(10 * 60),
            upload_attempts: 3,
            upload_concurrency: 2,
            flush_interval: Duration::from_secs(1),
            storage: StorageConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

/// Object store backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Local filesystem (tests, single-node deployments)
    Fs(FsStorageConfig),

    /// S3-compatible object store
    S3(S3StorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Fs(FsStorageConfig::default())
    }
}

/// Filesystem backend configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FsStorageConfig {
    /// Root directory uploads land under (defaults to "archive")
    pub root: String,
}

/// S3 backend configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3StorageConfig {
    /// Region; falls back to the AWS_REGION environment variable
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores
    pub endpoint: Option<String>,
}

/// Upload notification transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// No notifications
    None(NoneNotifierConfig),

    /// HTTP POST of receipt / error documents to a queue front-end
    Http(HttpNotifierConfig),
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self::None(NoneNotifierConfig {})
    }
}

/// Empty config for the no-op notifier
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoneNotifierConfig {}

/// HTTP notifier configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpNotifierConfig {
    /// Endpoint receiving `{"version": V, "keyname": "..."}` receipts
    pub receipt_url: String,

    /// Endpoint receiving error documents
    pub error_url: String,

    /// Receipt schema version
    pub version: u32,
}

impl Default for HttpNotifierConfig {
    fn default() -> Self {
        Self {
            receipt_url: String::new(),
            error_url: String::new(),
            version: 1,
        }
    }
}

/// Batching stream sink configuration.
///
/// # Example
///
/// ```json
/// {
///   "stream_name": "beacon-events",
///   "target": "stream-gateway:7400",
///   "buffer_size": 10000,
///   "batch_size": 400,
///   "flush_interval": "1s",
///   "max_attempts": 10
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSinkConfig {
    /// Downstream stream / partition-set name
    pub stream_name: String,

    /// Transport target (`host:port` for the TCP client)
    pub target: String,

    /// Bounded in-memory buffer; producers block when full
    pub buffer_size: usize,

    /// Records per batched publish
    pub batch_size: usize,

    /// Flush pending records at least this often
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Publish attempts per record before it goes to the fallback sink
    pub max_attempts: u32,

    /// Bound on the synchronous drain during shutdown
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for StreamSinkConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            target: String::new(),
            buffer_size: 10_000,
            batch_size: 400,
            flush_interval: Duration::from_secs(1),
            max_attempts: 10,
            stop_timeout: Duration::from_secs(5),
        }
    }
}
