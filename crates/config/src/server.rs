//! HTTP server configuration

use serde::Deserialize;

/// Default tracking listener port (`:8888`)
const DEFAULT_LISTEN_PORT: &str = ":8888";

/// Default ops/diagnostics listener port (`:8082`)
const DEFAULT_OPS_PORT: &str = ":8082";

/// Settings for the public tracking listener and the ops listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Tracking listener, `:<port>` form (e.g. ":8888")
    pub listen_port: String,

    /// Ops listener serving /health and /metrics, `:<port>` form
    pub ops_port: String,

    /// Constant identifying this deployment, stamped on every event
    pub edge_type: String,

    /// Statsd metric prefix
    pub stat_prefix: String,

    /// Glob patterns for acceptable CORS origins (e.g. "http*://*.example.com")
    pub cors_origins: Vec<String>,

    /// Body served at /crossdomain.xml
    pub cross_domain_policy: String,

    /// Split oversize payloads into per-element events instead of rejecting
    pub handle_large_events: bool,

    /// Sampling rate for the event-in-URI counter
    pub event_in_uri_sampling_rate: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT.into(),
            ops_port: DEFAULT_OPS_PORT.into(),
            edge_type: "internal".into(),
            stat_prefix: "edge".into(),
            cors_origins: Vec::new(),
            cross_domain_policy: String::new(),
            handle_large_events: true,
            event_in_uri_sampling_rate: 0.1,
        }
    }
}
