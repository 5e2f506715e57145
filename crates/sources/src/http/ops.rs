//! Ops listener
//!
//! Diagnostics on a separate port: liveness plus JSON snapshots of the
//! handler and sink metrics. Not exposed to the public edge.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use beacon_sinks::{ObjectSinkHandle, StreamSinkHandle};

use super::error::HttpSourceError;
use super::metrics::HttpSourceMetrics;

/// Metric sources exposed by the ops listener.
pub struct OpsState {
    /// Handler counters
    pub http: Arc<HttpSourceMetrics>,

    /// Event object sink
    pub event_sink: ObjectSinkHandle,

    /// Audit object sink
    pub audit_sink: ObjectSinkHandle,

    /// Stream sink, when configured
    pub stream_sink: Option<StreamSinkHandle>,
}

/// Diagnostics server for a fixed set of metric sources.
pub struct OpsServer {
    addr: String,
    state: Arc<OpsState>,
}

impl OpsServer {
    /// Create an ops server bound to `addr` once run.
    pub fn new(addr: impl Into<String>, state: OpsState) -> Self {
        Self {
            addr: addr.into(),
            state: Arc::new(state),
        }
    }

    /// Run the ops listener until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), HttpSourceError> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| HttpSourceError::Bind {
                address: self.addr.clone(),
                source: e,
            })?;

        tracing::info!(address = %self.addr, "ops listening");

        let app = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .with_state(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| HttpSourceError::Http(e.to_string()))
    }
}

/// GET /health - liveness
async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// GET /metrics - JSON snapshots of handler and sink metrics
async fn metrics(State(state): State<Arc<OpsState>>) -> impl IntoResponse {
    let http = state.http.snapshot();
    let event = state.event_sink.metrics_snapshot();
    let audit = state.audit_sink.metrics_snapshot();

    let stream = match &state.stream_sink {
        Some(handle) => {
            let s = handle.metrics_snapshot();
            json!({
                "records_received": s.records_received,
                "records_published": s.records_published,
                "records_retried": s.records_retried,
                "records_fallback": s.records_fallback,
                "records_lost": s.records_lost,
                "batches_published": s.batches_published,
                "publish_errors": s.publish_errors,
            })
        }
        None => serde_json::Value::Null,
    };

    Json(json!({
        "http": {
            "requests_total": http.requests_total,
            "requests_success": http.requests_success,
            "requests_client_error": http.requests_client_error,
            "requests_server_error": http.requests_server_error,
            "events_accepted": http.events_accepted,
            "events_split": http.events_split,
            "bytes_received": http.bytes_received,
            "bad_clients": http.bad_clients,
        },
        "event_sink": {
            "lines_written": event.lines_written,
            "write_errors": event.write_errors,
            "files_sealed": event.files_sealed,
            "uploads_completed": event.uploads_completed,
            "uploads_failed": event.uploads_failed,
            "upload_retries": event.upload_retries,
            "bytes_uploaded": event.bytes_uploaded,
        },
        "audit_sink": {
            "lines_written": audit.lines_written,
            "write_errors": audit.write_errors,
            "files_sealed": audit.files_sealed,
            "uploads_completed": audit.uploads_completed,
            "uploads_failed": audit.uploads_failed,
            "upload_retries": audit.upload_retries,
            "bytes_uploaded": audit.bytes_uploaded,
        },
        "stream_sink": stream,
    }))
}
