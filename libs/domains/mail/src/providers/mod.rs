//! Mail delivery providers.
//!
//! This module contains the `MailProvider` trait and implementations
//! for the supported transports.

mod mock;
mod resend;
mod smtp;

pub use mock::MockProvider;
pub use resend::{ResendConfig, ResendProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::{MailError, MailResult};
use crate::models::MailPayload;
use async_trait::async_trait;
use core_config::{FromEnv, env_or_default};
use std::sync::Arc;

/// Used when neither the payload nor the provider configuration names a sender.
pub const FALLBACK_SENDER: &str = "no-reply@localhost";

/// Message handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Mailbox, e.g. `"Ann <no-reply@example.com>"`
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl OutgoingMail {
    /// Build from a job payload, resolving the sender against `default_sender`.
    pub fn from_payload(payload: &MailPayload, default_sender: &str) -> Self {
        Self {
            from: format_sender(&payload.from, default_sender),
            to: payload.to.clone(),
            subject: payload.subject.clone(),
            text: payload.text.clone(),
            html: payload.html.clone(),
        }
    }
}

/// Provider acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    /// Provider-specific message id, when the transport returns one.
    pub message_id: Option<String>,
}

/// Resolve the `From` header.
///
/// A value that already contains an address is used as is, a bare display name
/// is paired with `default_sender`, and an empty value falls back to
/// `default_sender`.
pub fn format_sender(from: &str, default_sender: &str) -> String {
    let from = from.trim();
    if from.contains('@') {
        from.to_string()
    } else if !from.is_empty() {
        format!("{} <{}>", from, default_sender)
    } else {
        default_sender.to_string()
    }
}

/// Trait for mail transports.
///
/// Every transport failure is reported as [`MailError::Delivery`].
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<ProviderReceipt>;

    /// Address paired with bare display names.
    fn default_sender(&self) -> &str;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> MailResult<bool>;
}

/// Build the provider selected by `MAIL_PROVIDER` (`smtp` or `resend`).
pub fn provider_from_env() -> MailResult<Arc<dyn MailProvider>> {
    let kind = env_or_default("MAIL_PROVIDER", "smtp");
    match kind.trim().to_ascii_lowercase().as_str() {
        "smtp" => Ok(Arc::new(SmtpProvider::new(SmtpConfig::from_env()?)?)),
        "resend" => Ok(Arc::new(ResendProvider::new(ResendConfig::from_env()?)?)),
        other => Err(MailError::Config(format!(
            "unknown MAIL_PROVIDER '{}', expected 'smtp' or 'resend'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sender() {
        assert_eq!(
            format_sender("ann@example.com", "no-reply@app.io"),
            "ann@example.com"
        );
        assert_eq!(
            format_sender("Ann <ann@example.com>", "no-reply@app.io"),
            "Ann <ann@example.com>"
        );
        assert_eq!(format_sender("Ann", "no-reply@app.io"), "Ann <no-reply@app.io>");
        assert_eq!(format_sender("  ", "no-reply@app.io"), "no-reply@app.io");
    }

    #[test]
    fn test_outgoing_mail_from_payload() {
        let payload = MailPayload {
            to: "bob@example.com".into(),
            subject: "Hi".into(),
            text: None,
            html: Some("<p>Hi</p>".into()),
            from: "Ann".into(),
        };
        let mail = OutgoingMail::from_payload(&payload, FALLBACK_SENDER);
        assert_eq!(mail.from, "Ann <no-reply@localhost>");
        assert_eq!(mail.html.as_deref(), Some("<p>Hi</p>"));
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        temp_env::with_var("MAIL_PROVIDER", Some("carrier-pigeon"), || {
            let err = provider_from_env().err().unwrap();
            assert!(matches!(err, MailError::Config(_)));
        });
    }
}
