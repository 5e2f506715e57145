//! Configuration validation
//!
//! Startup misconfiguration is fatal: the binary refuses to serve with a
//! config that fails these checks.

use crate::error::{ConfigError, Result};
use crate::{Config, ObjectSinkConfig, StreamSinkConfig};

/// Validate the whole configuration tree.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_port("server", "listen_port", &config.server.listen_port)?;
    validate_port("server", "ops_port", &config.server.ops_port)?;

    let rate = config.server.event_in_uri_sampling_rate;
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::invalid_value(
            "server",
            "event_in_uri_sampling_rate",
            format!("{rate} is not within 0..=1"),
        ));
    }

    validate_object_sink("event_sink", &config.event_sink)?;
    validate_object_sink("audit_sink", &config.audit_sink)?;

    if let Some(stream) = &config.stream_sink {
        validate_stream_sink(stream)?;
    }

    if let Some(fallback) = &config.fallback_sink {
        validate_object_sink("fallback_sink", fallback)?;
    }

    Ok(())
}

fn validate_port(section: &'static str, field: &'static str, value: &str) -> Result<()> {
    if !value.contains(':') {
        return Err(ConfigError::invalid_value(
            section,
            field,
            format!("'{value}' is not of the ':<port>' form"),
        ));
    }
    Ok(())
}

fn validate_object_sink(section: &'static str, sink: &ObjectSinkConfig) -> Result<()> {
    if sink.bucket.is_empty() {
        return Err(ConfigError::missing_field(section, "bucket"));
    }
    if sink.max_lines == 0 {
        return Err(ConfigError::invalid_value(
            section,
            "max_lines",
            "must be at least 1",
        ));
    }
    if sink.upload_concurrency == 0 {
        return Err(ConfigError::invalid_value(
            section,
            "upload_concurrency",
            "must be at least 1",
        ));
    }
    if sink.upload_attempts == 0 {
        return Err(ConfigError::invalid_value(
            section,
            "upload_attempts",
            "must be at least 1",
        ));
    }
    Ok(())
}

fn validate_stream_sink(sink: &StreamSinkConfig) -> Result<()> {
    if sink.stream_name.is_empty() {
        return Err(ConfigError::missing_field("stream_sink", "stream_name"));
    }
    if sink.target.is_empty() {
        return Err(ConfigError::missing_field("stream_sink", "target"));
    }
    if sink.buffer_size == 0 || sink.batch_size == 0 {
        return Err(ConfigError::invalid_value(
            "stream_sink",
            "buffer_size",
            "buffer_size and batch_size must be at least 1",
        ));
    }
    if sink.max_attempts == 0 {
        return Err(ConfigError::invalid_value(
            "stream_sink",
            "max_attempts",
            "must be at least 1",
        ));
    }
    Ok(())
}
