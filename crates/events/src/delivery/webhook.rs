//! Webhook delivery.
//!
//! [`WebhookDelivery`] POSTs a JSON payload to a client callback URL.
//! Each outcome is delivered with exactly one attempt bounded by a request
//! timeout; a failed attempt is reported to the caller, which persists the
//! payload instead of retrying.

use std::time::Duration;

use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Sends one payload to one URL.
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError>;
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers payloads to client webhook endpoints over HTTP.
#[derive(Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    /// Create a delivery service whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post_once(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let status = self.client.post(url).json(payload).send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::HttpStatus(status.as_u16()))
        }
    }
}

#[async_trait]
impl WebhookSender for WebhookDelivery {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let result = self.post_once(url, payload).await;
        match &result {
            Ok(()) => tracing::debug!(url, "Webhook delivered"),
            Err(e) => tracing::warn!(url, error = %e, "Webhook delivery failed"),
        }
        result
    }
}
