//! Serve command - run the edge
//!
//! Bootstraps the sinks, the fan-out aggregate and the listeners, then
//! supervises them until a shutdown signal arrives. Drain order matters:
//! producers are gated first, then the stream sink drains (into the
//! fallback), then the object sinks seal and upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use opendal::Operator;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use beacon_config::{Config, NotifierConfig, StorageConfig};
use beacon_metrics::{NoopStats, StatSink, StatsdClient};
use beacon_protocol::{InstanceInfo, UuidAssigner};
use beacon_sinks::{
    EdgeSinks, HttpNotifier, LineFormatter, NoopNotifier, Notifier, ObjectSink, ObjectSinkConfig,
    ObjectSinkHandle, StreamSink, StreamSinkConfig, TcpRecordStreamClient, audit_line, json_line,
};
use beacon_sources::http::{OpsServer, OpsState};
use beacon_sources::{HttpSource, HttpSourceConfig};

/// Serve command arguments
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.json"),
        }
    }
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "beacon starting"
    );

    let config = Config::from_file(&args.config).context("failed to load configuration")?;

    if let Err(e) = run_server(config).await {
        error!(error = %e, "server error");
        return Err(e);
    }

    info!("beacon shutdown complete");
    Ok(())
}

/// Main server run loop
async fn run_server(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let object_cancel = CancellationToken::new();
    let stream_cancel = CancellationToken::new();

    let instance = InstanceInfo::from_env();
    let instance_id = instance.instance_id();
    let uuid = Arc::new(UuidAssigner::new(&instance));

    let stats = init_stats(&config.server.stat_prefix)?;

    // Object sinks: events, audits, and the optional stream fallback.
    let (event_sink, event_handle) = build_object_sink(
        "events",
        &config.event_sink,
        &config.logging_dir,
        &instance_id,
        json_line,
        object_cancel.clone(),
    )?;
    let (audit_sink, audit_handle) = build_object_sink(
        "audits",
        &config.audit_sink,
        &config.logging_dir,
        &instance_id,
        audit_line,
        object_cancel.clone(),
    )?;
    let event_task = tokio::spawn(event_sink.run());
    let audit_task = tokio::spawn(audit_sink.run());

    let mut fallback_task = None;
    let fallback_handle = match &config.fallback_sink {
        Some(fallback_config) => {
            let (sink, handle) = build_object_sink(
                "fallback",
                fallback_config,
                &config.logging_dir,
                &instance_id,
                json_line,
                object_cancel.clone(),
            )?;
            fallback_task = Some(tokio::spawn(sink.run()));
            Some(handle)
        }
        None => None,
    };

    // Stream sink, when configured. The edge still serves without one;
    // events then reach batch consumers only.
    let (stream_handle, stream_task) = match &config.stream_sink {
        Some(stream_config) => {
            let client = Arc::new(TcpRecordStreamClient::new(stream_config.target.clone()));
            let (sink, handle) = StreamSink::new(
                build_stream_config(stream_config),
                client,
                fallback_handle.clone(),
                stream_cancel.clone(),
            );
            info!(
                stream = %stream_config.stream_name,
                target = %stream_config.target,
                "stream sink configured"
            );
            (Some(handle), Some(tokio::spawn(sink.run())))
        }
        None => {
            info!("no stream sink configured, events go to the object sink only");
            (None, None)
        }
    };

    let sinks = Arc::new(EdgeSinks::new(
        audit_handle.clone(),
        event_handle.clone(),
        stream_handle.clone(),
    ));

    // Listeners.
    let source = HttpSource::new(
        build_http_config(&config),
        Arc::clone(&sinks),
        stats,
        Arc::clone(&uuid),
    );
    let http_metrics = source.metrics();
    let mut server_task = tokio::spawn(source.run(cancel.clone()));

    let ops = OpsServer::new(
        bind_addr(&config.server.ops_port),
        OpsState {
            http: http_metrics,
            event_sink: event_handle,
            audit_sink: audit_handle,
            stream_sink: stream_handle,
        },
    );
    let mut ops_task = tokio::spawn(ops.run(cancel.clone()));

    info!(instance = %instance_id, "beacon edge running");

    tokio::select! {
        result = &mut server_task => {
            // The listener died before any signal: fatal.
            cancel.cancel();
            stream_cancel.cancel();
            object_cancel.cancel();
            return match result? {
                Ok(()) => Err(anyhow::anyhow!("edge listener exited unexpectedly")),
                Err(e) => Err(e).context("edge listener failed"),
            };
        }
        result = &mut ops_task => {
            cancel.cancel();
            stream_cancel.cancel();
            object_cancel.cancel();
            return match result? {
                Ok(()) => Err(anyhow::anyhow!("ops listener exited unexpectedly")),
                Err(e) => Err(e).context("ops listener failed"),
            };
        }
        _ = wait_for_shutdown() => {}
    }

    info!("shutdown signal received, stopping edge...");

    // 1. Gate producers; in-flight log calls finish first.
    sinks.close().await;

    // 2. Stop the listeners (in-flight requests complete).
    cancel.cancel();
    if let Err(e) = server_task.await? {
        warn!(error = %e, "edge listener error during shutdown");
    }
    if let Err(e) = ops_task.await? {
        warn!(error = %e, "ops listener error during shutdown");
    }

    // 3. Stream sink drains, spilling into the fallback sink.
    stream_cancel.cancel();
    let mut records_lost = 0;
    if let Some(task) = stream_task {
        records_lost = task.await?.records_lost;
    }

    // 4. Object sinks seal their spool files and finish uploads.
    object_cancel.cancel();
    event_task.await?;
    audit_task.await?;
    if let Some(task) = fallback_task {
        task.await?;
    }

    if records_lost > 0 {
        anyhow::bail!("{records_lost} stream records lost during drain");
    }
    Ok(())
}

/// Construct one object sink from its file config.
fn build_object_sink(
    name: &str,
    file_config: &beacon_config::ObjectSinkConfig,
    logging_dir: &Path,
    instance_id: &str,
    format: LineFormatter,
    cancel: CancellationToken,
) -> Result<(ObjectSink, ObjectSinkHandle)> {
    let operator = build_operator(&file_config.bucket, &file_config.storage)
        .with_context(|| format!("failed to build object store for sink '{name}'"))?;
    let notifier = build_notifier(&file_config.notifier);

    let config = ObjectSinkConfig {
        name: name.into(),
        key_prefix: file_config.key_prefix.clone(),
        max_lines: file_config.max_lines,
        max_age: file_config.max_age,
        logging_dir: logging_dir.join(name),
        upload_attempts: file_config.upload_attempts,
        upload_concurrency: file_config.upload_concurrency,
        flush_interval: file_config.flush_interval,
        retry_delay: Duration::from_millis(250),
    };

    Ok(ObjectSink::new(
        config,
        operator,
        notifier,
        instance_id,
        format,
        cancel,
    ))
}

/// Build the opendal operator for a sink's storage backend.
fn build_operator(bucket: &str, storage: &StorageConfig) -> Result<Operator> {
    let operator = match storage {
        StorageConfig::Fs(fs) => {
            let root = PathBuf::from(&fs.root).join(bucket);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)?.finish()
        }
        StorageConfig::S3(s3) => {
            let region = s3
                .region
                .clone()
                .or_else(|| std::env::var("AWS_REGION").ok())
                .unwrap_or_else(|| "us-west-2".into());
            let mut builder = opendal::services::S3::default().bucket(bucket).region(&region);
            if let Some(endpoint) = &s3.endpoint {
                builder = builder.endpoint(endpoint);
            }
            Operator::new(builder)?.finish()
        }
    };
    Ok(operator)
}

/// Build the notifier for a sink's notification transport.
fn build_notifier(config: &NotifierConfig) -> Arc<dyn Notifier> {
    match config {
        NotifierConfig::None(_) => Arc::new(NoopNotifier),
        NotifierConfig::Http(http) => Arc::new(HttpNotifier::new(
            http.receipt_url.clone(),
            http.error_url.clone(),
            http.version,
        )),
    }
}

fn build_stream_config(file_config: &beacon_config::StreamSinkConfig) -> StreamSinkConfig {
    StreamSinkConfig {
        stream_name: file_config.stream_name.clone(),
        buffer_size: file_config.buffer_size,
        batch_size: file_config.batch_size,
        flush_interval: file_config.flush_interval,
        max_attempts: file_config.max_attempts,
        retry_delay: Duration::from_millis(100),
        stop_timeout: file_config.stop_timeout,
    }
}

fn build_http_config(config: &Config) -> HttpSourceConfig {
    HttpSourceConfig {
        listen_addr: bind_addr(&config.server.listen_port),
        ops_addr: bind_addr(&config.server.ops_port),
        edge_type: config.server.edge_type.clone(),
        cors_origins: config.server.cors_origins.clone(),
        cross_domain_policy: config.server.cross_domain_policy.clone(),
        handle_large_events: config.server.handle_large_events,
        event_in_uri_sampling_rate: config.server.event_in_uri_sampling_rate,
    }
}

/// Expand a ":8888"-style port into a bindable address.
fn bind_addr(port: &str) -> String {
    match port.strip_prefix(':') {
        Some(stripped) => format!("0.0.0.0:{stripped}"),
        None => port.to_string(),
    }
}

/// Statsd from the environment, or a no-op sink when unconfigured.
fn init_stats(prefix: &str) -> Result<Arc<dyn StatSink>> {
    match std::env::var("STATSD_HOSTPORT") {
        Ok(hostport) if !hostport.is_empty() => {
            let client =
                StatsdClient::new(&hostport, prefix).context("statsd configuration error")?;
            info!(endpoint = %hostport, "statsd reporting enabled");
            Ok(Arc::new(client))
        }
        _ => {
            info!("STATSD_HOSTPORT not set, stat reporting disabled");
            Ok(Arc::new(NoopStats))
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
