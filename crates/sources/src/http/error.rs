//! HTTP source error types

use thiserror::Error;

/// Errors from running the HTTP source
#[derive(Debug, Error)]
pub enum HttpSourceError {
    /// Failed to bind the listener
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Server error
    #[error("http server error: {0}")]
    Http(String),
}
