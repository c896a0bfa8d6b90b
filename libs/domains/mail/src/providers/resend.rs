//! Resend HTTP API provider.

use super::{FALLBACK_SENDER, MailProvider, OutgoingMail, ProviderReceipt};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse, env_required};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_API_URL: &str = "https://api.resend.com";

/// Resend API configuration.
#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub api_url: String,
    /// Address paired with bare display names
    pub default_sender: String,
    pub request_timeout: Duration,
}

impl ResendConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            default_sender: FALLBACK_SENDER.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_default_sender(mut self, sender: impl Into<String>) -> Self {
        self.default_sender = sender.into();
        self
    }
}

impl FromEnv for ResendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_required("RESEND_API_KEY")?,
            api_url: env_or_default("RESEND_API_URL", DEFAULT_API_URL),
            default_sender: env_optional("RESEND_FROM").unwrap_or_else(|| FALLBACK_SENDER.to_string()),
            request_timeout: Duration::from_millis(env_parse("RESEND_TIMEOUT_MS", 10_000)?),
        })
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResendErrorBody {
    message: String,
}

/// Resend mail provider.
pub struct ResendProvider {
    config: ResendConfig,
    client: Client,
}

impl ResendProvider {
    pub fn new(config: ResendConfig) -> MailResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MailProvider for ResendProvider {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<ProviderReceipt> {
        let request = ResendRequest {
            from: &mail.from,
            to: [mail.to.as_str()],
            subject: &mail.subject,
            text: mail.text.as_deref(),
            html: mail.html.as_deref(),
        };

        debug!(to = %mail.to, subject = %mail.subject, "Sending mail via Resend");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: ResendResponse = response.json().await?;
            info!(to = %mail.to, message_id = %body.id, "Mail sent via Resend");
            return Ok(ProviderReceipt {
                message_id: Some(body.id),
            });
        }

        let error_body = response.text().await.unwrap_or_default();
        error!(
            to = %mail.to,
            status = %status,
            error = %error_body,
            "Failed to send mail via Resend"
        );

        let message = serde_json::from_str::<ResendErrorBody>(&error_body)
            .map(|e| e.message)
            .unwrap_or(error_body);

        Err(MailError::Delivery(format!("Resend error ({}): {}", status, message)))
    }

    fn default_sender(&self) -> &str {
        &self.config.default_sender
    }

    fn name(&self) -> &'static str {
        "resend"
    }

    /// Resend has no health endpoint; only the key format is checked.
    async fn health_check(&self) -> MailResult<bool> {
        if self.config.api_key.starts_with("re_") {
            Ok(true)
        } else {
            Err(MailError::Config("Invalid Resend API key format".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("RESEND_API_KEY", Some("re_123")),
                ("RESEND_FROM", Some("hello@example.com")),
                ("RESEND_API_URL", None),
                ("RESEND_TIMEOUT_MS", None),
            ],
            || {
                let config = ResendConfig::from_env().unwrap();
                assert_eq!(config.api_key, "re_123");
                assert_eq!(config.api_url, DEFAULT_API_URL);
                assert_eq!(config.default_sender, "hello@example.com");
                assert_eq!(config.request_timeout, Duration::from_secs(10));
            },
        );
    }

    #[test]
    fn test_config_requires_api_key() {
        temp_env::with_var_unset("RESEND_API_KEY", || {
            assert!(ResendConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_request_body_shape() {
        let request = ResendRequest {
            from: "Ann <hello@example.com>",
            to: ["bob@example.com"],
            subject: "Hi",
            text: None,
            html: Some("<p>Hi</p>"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["to"][0], "bob@example.com");
        assert_eq!(json["html"], "<p>Hi</p>");
        assert!(json.get("text").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_delivery_error() {
        let provider = ResendProvider::new(
            ResendConfig::new("re_test").with_api_url("http://127.0.0.1:9"),
        )
        .unwrap();
        let mail = OutgoingMail {
            from: "hello@example.com".into(),
            to: "bob@example.com".into(),
            subject: "Hi".into(),
            text: Some("hi".into()),
            html: None,
        };

        let err = provider.send(&mail).await.unwrap_err();
        assert!(matches!(err, MailError::Delivery(_)));
        assert_eq!(provider.endpoint(), "http://127.0.0.1:9/emails");
    }

    #[tokio::test]
    async fn test_health_check_key_format() {
        let ok = ResendProvider::new(ResendConfig::new("re_abc")).unwrap();
        assert!(ok.health_check().await.unwrap());

        let bad = ResendProvider::new(ResendConfig::new("sk_abc")).unwrap();
        assert!(bad.health_check().await.is_err());
    }
}
