//! HTTP Source - tracking beacon ingestion
//!
//! The public entry point of the edge. Accepts analytics beacons on the
//! tracking listener and serves diagnostics on a separate ops listener.
//!
//! # Endpoints
//!
//! | Path | Methods | Success | Notes |
//! |------|---------|---------|-------|
//! | `/`, `/track`, `/track/`, `/v1/*` | GET, POST, OPTIONS | 204 (200 + pixel with `img=1`) | main ingest |
//! | `/healthcheck` | GET | 200 | |
//! | `/crossdomain.xml` | GET | 200 + XML | |
//! | `/robots.txt` | GET | 200 + text | |
//! | `/xarth` | GET | 200 + `XARTH` | liveness probe |
//!
//! Ingest accepts a form-encoded `data=<base64>` payload in the query
//! string or POST body, with optional `ua=1` (attach the user agent) and
//! `img=1` (answer with a transparent GIF). Unknown paths 404 and are
//! tagged `FourOhFour` for metrics.
//!
//! # Example
//!
//! ```ignore
//! use beacon_sources::{HttpSource, HttpSourceConfig};
//!
//! let source = HttpSource::new(config, sinks, stats, uuid);
//! source.run(cancel_token).await?;
//! ```

mod config;
mod context;
mod cors;
mod error;
mod handlers;
mod metrics;
mod ops;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use beacon_metrics::StatSink;
use beacon_protocol::UuidAssigner;
use beacon_sinks::EdgeSinks;

pub use config::HttpSourceConfig;
pub use error::HttpSourceError;
pub use handlers::HandlerState;
pub use metrics::{HttpMetricsSnapshot, HttpSourceMetrics};
pub use ops::{OpsServer, OpsState};

use cors::CorsPolicy;

/// HTTP source for tracking beacon ingestion
pub struct HttpSource {
    listen_addr: String,
    state: Arc<HandlerState>,
}

impl HttpSource {
    /// Create a new HTTP source
    pub fn new(
        config: HttpSourceConfig,
        sinks: Arc<EdgeSinks>,
        stats: Arc<dyn StatSink>,
        uuid: Arc<UuidAssigner>,
    ) -> Self {
        let state = Arc::new(HandlerState {
            sinks,
            stats,
            uuid,
            metrics: Arc::new(HttpSourceMetrics::new()),
            cors: CorsPolicy::new(&config.cors_origins),
            edge_type: config.edge_type,
            cross_domain_policy: config.cross_domain_policy.into(),
            handle_large_events: config.handle_large_events,
            event_in_uri_sampling_rate: config.event_in_uri_sampling_rate,
            clock: chrono::Utc::now,
        });

        Self {
            listen_addr: config.listen_addr,
            state,
        }
    }

    /// Get a handle to the source metrics (for the ops listener)
    pub fn metrics(&self) -> Arc<HttpSourceMetrics> {
        Arc::clone(&self.state.metrics)
    }

    /// Run the tracking listener
    ///
    /// Binds the configured address and accepts requests until cancelled;
    /// in-flight requests complete before the server returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), HttpSourceError> {
        let listener =
            TcpListener::bind(&self.listen_addr)
                .await
                .map_err(|e| HttpSourceError::Bind {
                    address: self.listen_addr.clone(),
                    source: e,
                })?;

        tracing::info!(address = %self.listen_addr, "edge listening");

        let app = build_router(Arc::clone(&self.state));
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
            .map_err(|e| HttpSourceError::Http(e.to_string()))?;

        tracing::info!("edge listener stopped");
        Ok(())
    }
}

/// Build the axum router: a single fallback handler services every path
/// so unknown endpoints can be tagged for metrics.
fn build_router(state: Arc<HandlerState>) -> Router {
    Router::new().fallback(handlers::dispatch).with_state(state)
}

/// Shutdown signal future
async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
}
