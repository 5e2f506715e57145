//! Upload worker pool
//!
//! Sealed spool files flow through here: each becomes one object-store
//! write under a generated key, with bounded retries. Final success emits
//! a receipt notification and deletes the local file; exhausted retries
//! emit an error notification and retain the file for operator
//! inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opendal::Operator;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use super::ObjectSinkMetrics;
use super::keys::KeyGenerator;
use crate::notify::Notifier;

/// Errors from a single upload attempt
#[derive(Debug, thiserror::Error)]
enum UploadError {
    /// Could not read the sealed spool file
    #[error("failed to read spool file: {0}")]
    Io(#[from] std::io::Error),

    /// Object store rejected the write
    #[error("object store write failed: {0}")]
    Store(#[from] opendal::Error),
}

/// Concurrency-bounded upload pool for sealed spool files.
pub(crate) struct Uploader {
    name: Arc<str>,
    operator: Operator,
    notifier: Arc<dyn Notifier>,
    keys: Arc<KeyGenerator>,
    attempts: usize,
    retry_delay: Duration,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    metrics: Arc<ObjectSinkMetrics>,
}

impl Uploader {
    pub(crate) fn new(
        name: Arc<str>,
        operator: Operator,
        notifier: Arc<dyn Notifier>,
        keys: KeyGenerator,
        attempts: usize,
        retry_delay: Duration,
        concurrency: usize,
        metrics: Arc<ObjectSinkMetrics>,
    ) -> Self {
        Self {
            name,
            operator,
            notifier,
            keys: Arc::new(keys),
            attempts,
            retry_delay,
            permits: Arc::new(Semaphore::new(concurrency)),
            tracker: TaskTracker::new(),
            metrics,
        }
    }

    /// Queue a sealed file for upload. Returns immediately; the upload
    /// runs on the worker pool.
    pub(crate) fn submit(&self, path: PathBuf) {
        let name = Arc::clone(&self.name);
        let operator = self.operator.clone();
        let notifier = Arc::clone(&self.notifier);
        let keys = Arc::clone(&self.keys);
        let permits = Arc::clone(&self.permits);
        let metrics = Arc::clone(&self.metrics);
        let attempts = self.attempts;
        let retry_delay = self.retry_delay;

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            upload_file(
                &name, &operator, &*notifier, &keys, &path, attempts, retry_delay, &metrics,
            )
            .await;
        });
    }

    /// Drain the queue and wait for in-flight uploads to finish.
    pub(crate) async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Upload one file with bounded retries, then notify.
#[allow(clippy::too_many_arguments)]
async fn upload_file(
    name: &str,
    operator: &Operator,
    notifier: &dyn Notifier,
    keys: &KeyGenerator,
    path: &Path,
    attempts: usize,
    retry_delay: Duration,
    metrics: &ObjectSinkMetrics,
) {
    let key = keys.next_key(Utc::now().timestamp());
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match try_upload(operator, &key, path).await {
            Ok(bytes) => {
                metrics.record_upload(bytes);
                notifier.send_receipt(&key).await;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(
                        sink = %name,
                        path = %path.display(),
                        error = %e,
                        "failed to delete uploaded spool file"
                    );
                }
                tracing::info!(sink = %name, key = %key, bytes, "sealed file uploaded");
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < attempts {
                    metrics.record_upload_retry();
                    tracing::warn!(
                        sink = %name,
                        key = %key,
                        attempt,
                        max_attempts = attempts,
                        error = %last_error,
                        "upload failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    // The spool file is retained for operator inspection.
    metrics.record_upload_failed();
    tracing::error!(
        sink = %name,
        key = %key,
        path = %path.display(),
        attempts,
        error = %last_error,
        "upload failed after all attempts, spool file retained"
    );
    notifier
        .send_error(&format!(
            "upload of {} as {} failed after {} attempts: {}",
            path.display(),
            key,
            attempts,
            last_error
        ))
        .await;
}

async fn try_upload(operator: &Operator, key: &str, path: &Path) -> Result<u64, UploadError> {
    let bytes = tokio::fs::read(path).await?;
    let len = bytes.len() as u64;
    operator.write(key, bytes).await?;
    Ok(len)
}
