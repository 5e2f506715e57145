//! HTTP source configuration
//!
//! Runtime options for the tracking listener and the ops listener.

/// HTTP source configuration
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Bind address for the tracking listener (e.g. "0.0.0.0:8888")
    pub listen_addr: String,

    /// Bind address for the ops listener (e.g. "0.0.0.0:8082")
    pub ops_addr: String,

    /// Constant identifying this deployment, stamped on every event
    pub edge_type: String,

    /// Glob patterns for acceptable CORS origins
    pub cors_origins: Vec<String>,

    /// Body served at /crossdomain.xml
    pub cross_domain_policy: String,

    /// Split oversize payloads into per-element events instead of rejecting
    pub handle_large_events: bool,

    /// Sampling rate for the event-in-URI counter
    pub event_in_uri_sampling_rate: f32,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8888".into(),
            ops_addr: "0.0.0.0:8082".into(),
            edge_type: "internal".into(),
            cors_origins: Vec::new(),
            cross_domain_policy: String::new(),
            handle_large_events: true,
            event_in_uri_sampling_rate: 0.1,
        }
    }
}
