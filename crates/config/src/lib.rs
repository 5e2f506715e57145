//! Beacon Configuration
//!
//! JSON-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use beacon_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str(r#"{"event_sink": {"bucket": "events"}, "audit_sink": {"bucket": "audits"}}"#).unwrap();
//! ```
//!
//! # Example Minimal Config
//!
//! ```json
//! {
//!   "event_sink": { "bucket": "beacon-events" },
//!   "audit_sink": { "bucket": "beacon-audits" }
//! }
//! ```

mod error;
mod server;
mod sinks;
mod validation;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use server::ServerConfig;
pub use sinks::{
    FsStorageConfig, HttpNotifierConfig, NoneNotifierConfig, NotifierConfig, ObjectSinkConfig,
    S3StorageConfig, StorageConfig, StreamSinkConfig,
};

use serde::Deserialize;

/// Main configuration structure
///
/// All sections besides the two object sinks are optional with defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings, CORS globs, cross-domain policy
    pub server: ServerConfig,

    /// Directory spool files are written to before upload
    #[serde(default = "default_logging_dir")]
    pub logging_dir: PathBuf,

    /// Object sink receiving one JSON line per event
    pub event_sink: ObjectSinkConfig,

    /// Object sink receiving one audit line per event
    pub audit_sink: ObjectSinkConfig,

    /// Streaming sink for near-real-time consumers (optional; a no-op
    /// stand-in is used when absent)
    pub stream_sink: Option<StreamSinkConfig>,

    /// Object sink capturing stream records that exhausted retries
    pub fallback_sink: Option<ObjectSinkConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or contains invalid JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a JSON string
    fn parse(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from(".")
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
