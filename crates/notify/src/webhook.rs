//! HTTP webhook client.
//!
//! Posts grant payloads as JSON with optional static headers. `${VAR}`
//! references in the URL and header values are resolved once, at
//! construction.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use grantflow_core::config::DeliveryConfig;

use crate::traits::{NotifyError, WebhookClient, WebhookResponse};

#[derive(Debug)]
pub struct HttpWebhookClient {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpWebhookClient {
    /// Missing env vars and unclosed references are [`NotifyError::Config`].
    pub fn new(url: &str, headers: &HashMap<String, String>, timeout_secs: u64) -> Result<Self, NotifyError> {
        let url = resolve_env_vars(url)?;
        reqwest::Url::parse(&url).map_err(|e| NotifyError::Config(format!("invalid webhook URL '{url}': {e}")))?;

        let headers = headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), resolve_env_vars(value)?)))
            .collect::<Result<HashMap<_, _>, NotifyError>>()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self { url, headers, client })
    }

    pub fn from_config(config: &DeliveryConfig) -> Result<Self, NotifyError> {
        let url = config
            .webhook_url
            .as_deref()
            .ok_or_else(|| NotifyError::Config("WEBHOOK_URL is not set".into()))?;
        Self::new(url, &config.webhook_headers, config.timeout_secs)
    }
}

#[async_trait::async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn post(&self, payload: &Value) -> Result<WebhookResponse, NotifyError> {
        let mut request = self.client.post(&self.url).json(payload);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotifyError::Timeout(e.to_string())
            } else {
                NotifyError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(url = %self.url, status, "webhook replied");
        Ok(WebhookResponse { status, body })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

/// Replace every `${NAME}` with the value of env var `NAME`.
fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let end = tail
            .find('}')
            .ok_or_else(|| NotifyError::Config(format!("unclosed env var reference in: {input}")))?;
        let name = &tail[..end];
        let value =
            std::env::var(name).map_err(|_| NotifyError::Config(format!("env var not found: {name}")))?;
        out.push_str(&value);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_references_are_substituted() {
        std::env::set_var("GF_HOOK_HOST", "n8n.example.org");
        std::env::set_var("GF_HOOK_PATH", "grants");
        let url = resolve_env_vars("https://${GF_HOOK_HOST}/webhook/${GF_HOOK_PATH}").unwrap();
        assert_eq!(url, "https://n8n.example.org/webhook/grants");
        std::env::remove_var("GF_HOOK_HOST");
        std::env::remove_var("GF_HOOK_PATH");
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(resolve_env_vars("https://hooks.example.org/x").unwrap(), "https://hooks.example.org/x");
    }

    #[test]
    fn missing_variable_names_it() {
        match resolve_env_vars("${GF_SURELY_UNSET_98765}") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("GF_SURELY_UNSET_98765")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn unclosed_reference_is_rejected() {
        assert!(matches!(resolve_env_vars("https://${BROKEN/x"), Err(NotifyError::Config(_))));
    }

    #[test]
    fn header_values_are_resolved() {
        std::env::set_var("GF_HOOK_TOKEN", "s3cret");
        let headers = HashMap::from([("X-Api-Key".to_string(), "${GF_HOOK_TOKEN}".to_string())]);
        let client = HttpWebhookClient::new("https://hooks.example.org/x", &headers, 5).unwrap();
        assert_eq!(client.headers["X-Api-Key"], "s3cret");
        assert_eq!(client.endpoint(), "https://hooks.example.org/x");
        std::env::remove_var("GF_HOOK_TOKEN");
    }

    #[test]
    fn unconfigured_url_is_a_config_error() {
        let config = DeliveryConfig { webhook_url: None, ..DeliveryConfig::default() };
        assert!(matches!(HttpWebhookClient::from_config(&config), Err(NotifyError::Config(_))));
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(HttpWebhookClient::new("not a url", &HashMap::new(), 5).is_err());
    }
}
