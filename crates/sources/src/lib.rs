//! Beacon - Sources
//!
//! The HTTP entry point of the edge: accepts tracking beacons, normalizes
//! each hit into an event and fans it out to the configured sinks.

pub mod http;

pub use http::{HttpSource, HttpSourceConfig, HttpSourceError};
