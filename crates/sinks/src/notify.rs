//! Upload notifications
//!
//! A notifier is the capability the object sink uses to announce sealed
//! files to downstream consumers: a receipt per successfully uploaded
//! key, an error document when an upload exhausts its retries.
//!
//! Notification delivery is best-effort: failures are logged, never
//! propagated back into the upload pipeline.

use async_trait::async_trait;
use serde_json::json;

/// Capability for announcing upload outcomes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a successfully uploaded object key.
    async fn send_receipt(&self, key: &str);

    /// Announce an upload that exhausted its retries.
    async fn send_error(&self, message: &str);
}

/// No-op notifier for deployments that opt out of notifications.
///
/// Exists because the upload pipeline always holds a notifier; opting out
/// is a configuration choice, not a nullable field.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_receipt(&self, _key: &str) {}

    async fn send_error(&self, _message: &str) {}
}

/// HTTP notifier posting JSON documents to a queue front-end.
///
/// Receipts carry `{"version": V, "keyname": "..."}`; errors carry the
/// error text.
pub struct HttpNotifier {
    client: reqwest::Client,
    receipt_url: String,
    error_url: String,
    version: u32,
}

impl HttpNotifier {
    /// Create a notifier posting to the given endpoints.
    pub fn new(receipt_url: impl Into<String>, error_url: impl Into<String>, version: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            receipt_url: receipt_url.into(),
            error_url: error_url.into(),
            version,
        }
    }

    async fn post(&self, url: &str, body: serde_json::Value) {
        if url.is_empty() {
            return;
        }
        match self.client.post(url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(url = %url, status = %response.status(), "notification rejected");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "notification send failed");
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_receipt(&self, key: &str) {
        self.post(
            &self.receipt_url,
            json!({ "version": self.version, "keyname": key }),
        )
        .await;
    }

    async fn send_error(&self, message: &str) {
        self.post(&self.error_url, json!({ "error": message })).await;
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod notify_test;
