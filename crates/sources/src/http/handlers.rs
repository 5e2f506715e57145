//! Tracking request handlers
//!
//! One dispatch handler services every path so unknown endpoints can be
//! tagged for metrics. The ingest path parses the hit, builds events and
//! fans them out; oversize payloads are split into per-element events.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::{GeneralPurpose, STANDARD, URL_SAFE};
use serde_json::value::RawValue;

use beacon_metrics::StatSink;
use beacon_protocol::{Event, UuidAssigner};
use beacon_sinks::{EdgeSinks, FanoutReport};

use super::context::{RequestContext, TimerInstance};
use super::cors::{ALLOWED_METHODS_HEADER, CorsPolicy};
use super::metrics::HttpSourceMetrics;

/// Header the client IP chain arrives in
const IP_FORWARD_HEADER: &str = "x-forwarded-for";

/// Endpoint tag for unknown paths
const BAD_ENDPOINT: &str = "FourOhFour";

/// Payloads beyond this are rejected or split
const MAX_BYTES_PER_REQUEST: usize = 500 * 1024;

/// Hard cap on reading a request body (the classic form-parser default)
const MAX_BODY_READ_BYTES: usize = 10 * 1024 * 1024;

/// User agents beyond this are likely garbage and get dropped
const MAX_USER_AGENT_BYTES: usize = 1024;

/// CORS preflight max age: one day
const CORS_MAX_AGE: &str = "86400";

/// Server read deadline for request bodies
const BODY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Sampling rate for per-host request counters
const HOST_SAMPLING_RATE: f32 = 0.01;

/// Sampling rate for status code counters
const STATUS_SAMPLING_RATE: f32 = 0.001;

/// Liveness probe body
const XARTH: &[u8] = b"XARTH";

/// Raw-body prefix left by misbehaving form clients
const DATA_PREFIX: &[u8] = b"data=";

const ROBOTS_TXT: &[u8] = b"User-agent: *\nDisallow: /";

// from https://commons.wikimedia.org/wiki/File:Transparent.gif
static TRANSPARENT_PIXEL: [u8; 43] = [
    71, 73, 70, 56, 57, 97, 1, 0, 1, 0, 128, 0, 0, 0, 0, 0, 255, 255, 255, 33, 249, 4, 1, 0, 0, 0,
    0, 44, 0, 0, 0, 0, 1, 0, 1, 0, 0, 2, 2, 68, 1, 0, 59,
];

/// Shared state for the dispatch handler
pub struct HandlerState {
    /// Fan-out aggregate every event is written through
    pub sinks: Arc<EdgeSinks>,

    /// Sampled statsd counters and timers
    pub stats: Arc<dyn StatSink>,

    /// UUID assignment (process identity + atomic counter)
    pub uuid: Arc<UuidAssigner>,

    /// Atomic counters served by the ops endpoint
    pub metrics: Arc<HttpSourceMetrics>,

    /// Compiled CORS origin globs
    pub cors: CorsPolicy,

    /// Deployment constant stamped on every event
    pub edge_type: String,

    /// Body served at /crossdomain.xml
    pub cross_domain_policy: Bytes,

    /// Split oversize payloads instead of rejecting them
    pub handle_large_events: bool,

    /// Sampling rate for the event-in-URI counter
    pub event_in_uri_sampling_rate: f32,

    /// Wall-clock source, injectable for tests
    pub clock: fn() -> chrono::DateTime<chrono::Utc>,
}

type BaseHeaders = Vec<(header::HeaderName, HeaderValue)>;

/// Service one request: method gate, CORS, path dispatch, stat flush.
pub async fn dispatch(State(state): State<Arc<HandlerState>>, req: Request<Body>) -> Response {
    state.metrics.request_received();

    let method = req.method().clone();
    if !matches!(method, Method::GET | Method::POST | Method::OPTIONS) {
        state.metrics.request_finished(400);
        return status_response(StatusCode::BAD_REQUEST, &[]);
    }

    let mut base_headers: BaseHeaders = vec![(header::VARY, HeaderValue::from_static("Origin"))];
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.cors.is_acceptable_origin(origin)
        && let Ok(value) = HeaderValue::from_str(origin)
    {
        base_headers.push((header::ACCESS_CONTROL_ALLOW_ORIGIN, value));
        base_headers.push((
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS_HEADER),
        ));
    }

    if method == Method::OPTIONS {
        base_headers.push((
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(CORS_MAX_AGE),
        ));
        state.metrics.request_finished(200);
        return status_response(StatusCode::OK, &base_headers);
    }

    let mut http_timer = TimerInstance::new();
    let path = req.uri().path().to_string();
    let mut ctx = RequestContext::new((state.clock)(), method.as_str(), &path, IP_FORWARD_HEADER);

    let routed = if path.starts_with("/v1/") {
        "/track"
    } else {
        path.as_str()
    };

    let response = match routed {
        "/crossdomain.xml" => body_response(
            StatusCode::OK,
            &base_headers,
            "application/xml",
            state.cross_domain_policy.clone(),
        ),
        "/robots.txt" => body_response(
            StatusCode::OK,
            &base_headers,
            "text/plain",
            Bytes::from_static(ROBOTS_TXT),
        ),
        "/healthcheck" => status_response(StatusCode::OK, &base_headers),
        "/xarth" => body_response(
            StatusCode::OK,
            &base_headers,
            "text/plain",
            Bytes::from_static(XARTH),
        ),
        "/" | "/track" | "/track/" => handle_track(&state, req, &mut ctx, &base_headers).await,
        _ => {
            ctx.endpoint = BAD_ENDPOINT.to_string();
            status_response(StatusCode::NOT_FOUND, &base_headers)
        }
    };

    let status = response.status().as_u16();
    ctx.status = status;
    ctx.record_timer("http", http_timer.stop_timing());
    state
        .stats
        .incr(&format!("status_code.{status}"), 1, STATUS_SAMPLING_RATE);
    state.metrics.request_finished(status);
    ctx.record_stats(&*state.stats);

    response
}

/// Service one tracking hit.
async fn handle_track(
    state: &Arc<HandlerState>,
    req: Request<Body>,
    ctx: &mut RequestContext,
    base_headers: &BaseHeaders,
) -> Response {
    let mut timer = TimerInstance::new();
    let (parts, body) = req.into_parts();

    let query = parts.uri.query().unwrap_or("");
    let query_pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();

    let forwarded_for = parts
        .headers
        .get(IP_FORWARD_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let client_ip = parse_last_forwarder(&forwarded_for);
    ctx.record_timer("ip", timer.stop_timing());

    // Counted on key presence, even with an empty value.
    if query_pairs.iter().any(|(key, _)| key == "data") {
        state
            .stats
            .incr("event_in_URI", 1, state.event_in_uri_sampling_rate);
    }
    if parts.uri.to_string().len() > 8192 {
        state.stats.incr("large_URI", 1, 1.0);
    }
    if let Some(host) = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(sanitize_host_value)
    {
        state
            .stats
            .incr(&format!("requests.hosts.{host}"), 1, HOST_SAMPLING_RATE);
    }

    let body_read = tokio::time::timeout(
        BODY_READ_TIMEOUT,
        axum::body::to_bytes(body, MAX_BODY_READ_BYTES),
    )
    .await;
    let body_bytes = match body_read {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            // The body-limit layer is only identifiable by its error text.
            return if e.to_string().contains("length limit") {
                log_large_request(state, &parts.headers, "");
                status_response(StatusCode::PAYLOAD_TOO_LARGE, base_headers)
            } else {
                state.stats.incr("bad_request.read_data", 1, 0.01);
                status_response(StatusCode::BAD_REQUEST, base_headers)
            };
        }
        Err(_) => {
            state.stats.incr("bad_request.read_timeout", 1, 0.01);
            // Legacy quirk: downstream consumers expect 502 here, not 408.
            return status_response(StatusCode::BAD_GATEWAY, base_headers);
        }
    };
    state.metrics.bytes_received(body_bytes.len() as u64);

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");

    // Form body values take precedence over the query string.
    let mut data: Option<String> = None;
    if is_form {
        let body_pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(&body_bytes).unwrap_or_default();
        data = form_value(&body_pairs, "data").map(String::from);
    }
    if data.is_none() {
        data = form_value(&query_pairs, "data").map(String::from);
    }
    if data.is_none() && parts.method == Method::POST && !body_bytes.is_empty() && !is_form {
        // Clients sometimes POST a form body with the wrong content type;
        // best effort from here on out.
        let mut raw: &[u8] = &body_bytes;
        if raw.len() >= DATA_PREFIX.len() && &raw[..DATA_PREFIX.len()] == DATA_PREFIX {
            ctx.bad_client = true;
            state.metrics.bad_client();
            raw = &raw[DATA_PREFIX.len()..];
        }
        let text = String::from_utf8_lossy(raw).into_owned();
        if !text.is_empty() {
            data = Some(text);
        }
    }

    let Some(data) = data else {
        state.stats.incr("bad_request.empty", 1, 0.01);
        return status_response(StatusCode::BAD_REQUEST, base_headers);
    };

    let mut user_agent = "";
    if form_value(&query_pairs, "ua") == Some("1") {
        let from_header = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        // anything over the max is likely garbage data
        if from_header.len() <= MAX_USER_AGENT_BYTES {
            user_agent = from_header;
        } else {
            log_large_user_agent(state, from_header, &data);
        }
    }
    ctx.record_timer("data", timer.stop_timing());

    let img = form_value(&query_pairs, "img") == Some("1");

    let status = if data.len() > MAX_BYTES_PER_REQUEST {
        handle_large_event(
            state,
            ctx,
            &data,
            client_ip,
            &forwarded_for,
            user_agent,
            &parts.headers,
        )
        .await
    } else {
        let event = build_event(state, ctx, client_ip, &forwarded_for, &data, user_agent);
        match state.sinks.log(&event).await {
            Ok(report) => {
                record_report(ctx, &report);
                state.metrics.events_accepted(1);
                StatusCode::NO_CONTENT
            }
            Err(e) => {
                tracing::warn!(error = %e, "error writing to sinks");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    };
    ctx.record_timer("write", timer.stop_timing());

    if img {
        pixel_response(base_headers)
    } else {
        status_response(status, base_headers)
    }
}

/// Split an oversize payload into one event per JSON array element.
///
/// The payload must decode to a JSON array of objects; each element is
/// re-encoded as standard base64 and written as an independent event.
/// Partial write failures still succeed as long as one element landed.
async fn handle_large_event(
    state: &Arc<HandlerState>,
    ctx: &mut RequestContext,
    data: &str,
    client_ip: Option<IpAddr>,
    forwarded_for: &str,
    user_agent: &str,
    headers: &HeaderMap,
) -> StatusCode {
    if !state.handle_large_events {
        return StatusCode::PAYLOAD_TOO_LARGE;
    }
    state.stats.incr("split_large_request.request.total", 1, 0.1);

    let engine = detect_base64_engine(data.as_bytes());
    let decoded = match engine.decode(data.as_bytes()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "error base64-decoding large request");
            log_large_request(state, headers, data);
            state
                .stats
                .incr("split_large_request.request.fail.base64", 1, 0.1);
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
    };

    if decoded.len() < 2 || &decoded[..2] != b"[{" {
        tracing::warn!("unexpected bytes in large event");
        log_large_request(state, headers, data);
        state
            .stats
            .incr("split_large_request.request.fail.json", 1, 0.1);
        return StatusCode::PAYLOAD_TOO_LARGE;
    }

    let elements: Vec<&RawValue> = match serde_json::from_slice(&decoded) {
        Ok(elements) => elements,
        Err(e) => {
            tracing::warn!(error = %e, "error unmarshaling large request into JSON");
            log_large_request(state, headers, data);
            state
                .stats
                .incr("split_large_request.request.fail.json", 1, 0.1);
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
    };

    let mut status = StatusCode::NO_CONTENT;
    let mut success: i64 = 0;
    let mut fail: i64 = 0;

    for element in &elements {
        let encoded = STANDARD.encode(element.get().as_bytes());
        if encoded.len() > MAX_BYTES_PER_REQUEST {
            log_large_request(state, headers, &encoded);
            // Already-written elements stand; the caller sees 413.
            status = StatusCode::PAYLOAD_TOO_LARGE;
        }
        let event = build_event(state, ctx, client_ip, forwarded_for, &encoded, user_agent);
        match state.sinks.log(&event).await {
            Ok(report) => {
                record_report(ctx, &report);
                success += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "error writing split event");
                fail += 1;
            }
        }
    }

    state.metrics.events_split(success as u64);
    state.metrics.events_accepted(success as u64);

    if fail != 0 {
        state.stats.incr("split_large_request.event.fail", fail, 0.1);
        state
            .stats
            .incr("split_large_request.request.fail.partial", 1, 0.1);
    } else {
        state
            .stats
            .incr("split_large_request.request.success", 1, 0.1);
    }
    state
        .stats
        .incr("split_large_request.event.total", elements.len() as i64, 0.1);
    state
        .stats
        .incr("split_large_request.event.success", success, 0.1);

    // If only some writes failed, report success so clients don't resend
    // and duplicate the written elements.
    if success == 0 {
        state
            .stats
            .incr("split_large_request.request.fail.write", 1, 0.1);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    status
}

fn build_event(
    state: &HandlerState,
    ctx: &RequestContext,
    client_ip: Option<IpAddr>,
    forwarded_for: &str,
    data: &str,
    user_agent: &str,
) -> Event {
    let uuid = state.uuid.assign(ctx.now);
    Event::new(
        ctx.now,
        client_ip,
        forwarded_for,
        uuid,
        data,
        user_agent,
        state.edge_type.clone(),
    )
}

fn record_report(ctx: &mut RequestContext, report: &FanoutReport) {
    ctx.record_attempt("event", report.object_ok);
    if let Some(ok) = report.stream_ok {
        ctx.record_attempt("stream", ok);
    }
    ctx.record_attempt("audit", report.audit_ok);
}

/// The client is the last hop of the comma-separated forwarded chain.
fn parse_last_forwarder(header: &str) -> Option<IpAddr> {
    header
        .rsplit(',')
        .next()
        .map(str::trim)
        .and_then(|ip| ip.parse().ok())
}

/// First non-empty value for a form key.
fn form_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Lowercase, strip the port, and make the host metric-safe.
fn sanitize_host_value(host: &str) -> Option<String> {
    let host = host.trim().to_lowercase();
    let without_port = host.split(':').next().unwrap_or("");
    if without_port.is_empty() {
        return None;
    }
    Some(without_port.replace('.', "_"))
}

/// Pick the base64 alphabet by scanning for its distinguishing bytes;
/// ties break to the standard alphabet.
fn detect_base64_engine(data: &[u8]) -> &'static GeneralPurpose {
    for &b in data {
        match b {
            b'-' | b'_' => return &URL_SAFE,
            b'+' | b'/' => return &STANDARD,
            _ => {}
        }
    }
    &STANDARD
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    } else {
        s
    }
}

fn log_large_request(state: &HandlerState, headers: &HeaderMap, data: &str) {
    state.stats.incr("large_request", 1, 0.1);
    tracing::warn!(
        sent_from = headers
            .get(IP_FORWARD_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
        data_head = truncate(data, 100),
        "request larger than 500KB, rejecting"
    );
}

fn log_large_user_agent(state: &HandlerState, user_agent: &str, data: &str) {
    state.stats.incr("large_user_agent", 1, 0.1);
    tracing::warn!(
        user_agent = truncate(user_agent, 100),
        data_head = truncate(data, 100),
        "user agent larger than {MAX_USER_AGENT_BYTES} bytes, dropping"
    );
}

// =============================================================================
// Response helpers
// =============================================================================

fn status_response(status: StatusCode, headers: &[(header::HeaderName, HeaderValue)]) -> Response {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn body_response(
    status: StatusCode,
    headers: &[(header::HeaderName, HeaderValue)],
    content_type: &'static str,
    body: Bytes,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// 200 + the transparent pixel, uncacheable.
fn pixel_response(headers: &[(header::HeaderName, HeaderValue)]) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/gif")
        .header(header::CACHE_CONTROL, "no-cache, max-age=0");
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(TRANSPARENT_PIXEL.as_slice()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;
