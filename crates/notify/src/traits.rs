//! Webhook client trait and shared error types.

use serde_json::Value;

/// Errors raised below the delivery service. Classified into attempt
/// outcomes, never returned to delivery callers.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    /// Network-level failures that a later attempt may get past.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Http(_) | NotifyError::Timeout(_))
    }
}

/// Status and body of an endpoint reply. Any status, including non-2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Posts one JSON payload to the downstream endpoint.
///
/// `Ok` carries whatever the endpoint replied; only failures to get a reply
/// at all are `Err`.
#[async_trait::async_trait]
pub trait WebhookClient: Send + Sync {
    async fn post(&self, payload: &Value) -> Result<WebhookResponse, NotifyError>;

    /// Target URL, for logs.
    fn endpoint(&self) -> &str;
}
