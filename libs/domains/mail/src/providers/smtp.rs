//! SMTP provider using lettre.
//!
//! With `SMTP_SECURE=false` (the default) the transport speaks plain SMTP,
//! which is what local catchers like Mailpit expect.

use super::{FALLBACK_SENDER, MailProvider, OutgoingMail, ProviderReceipt};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_flag, env_optional, env_or_default, env_parse};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS (`SMTP_SECURE`)
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Address paired with bare display names
    pub default_sender: String,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
            username: None,
            password: None,
            default_sender: FALLBACK_SENDER.to_string(),
        }
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_default_sender(mut self, sender: impl Into<String>) -> Self {
        self.default_sender = sender.into();
        self
    }
}

impl FromEnv for SmtpConfig {
    /// `SMTP_FROM` wins; otherwise the login name doubles as the sender when it
    /// is an address.
    fn from_env() -> Result<Self, ConfigError> {
        let username = env_optional("SMTP_USER");
        let default_sender = env_optional("SMTP_FROM")
            .or_else(|| username.clone().filter(|u| u.contains('@')))
            .unwrap_or_else(|| FALLBACK_SENDER.to_string());

        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            secure: env_flag("SMTP_SECURE", false)?,
            username,
            password: env_optional("SMTP_PASS"),
            default_sender,
        })
    }
}

/// SMTP mail provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpProvider {
    pub fn new(config: SmtpConfig) -> MailResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self { transport, config })
    }

    fn build_transport(config: &SmtpConfig) -> MailResult<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Config(format!("Failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut builder = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn build_message(mail: &OutgoingMail) -> MailResult<Message> {
        let from: Mailbox = mail
            .from
            .parse()
            .map_err(|e| MailError::Delivery(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| MailError::Delivery(format!("Invalid to address: {}", e)))?;

        let builder = Message::builder().from(from).to(to).subject(&mail.subject);

        let message = match (&mail.text, &mail.html) {
            (Some(text), Some(html)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(text), None) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
            (None, Some(html)) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
            (None, None) => {
                return Err(MailError::Delivery(
                    "Message must have either text or HTML body".to_string(),
                ));
            }
        };

        message.map_err(|e| MailError::Delivery(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl MailProvider for SmtpProvider {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<ProviderReceipt> {
        debug!(
            to = %mail.to,
            subject = %mail.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending mail via SMTP"
        );

        let message = Self::build_message(mail)?;

        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = %mail.to, error = %e, "Failed to send mail via SMTP");
            MailError::from(e)
        })?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(to = %mail.to, message_id = ?message_id, "Mail sent via SMTP");

        Ok(ProviderReceipt { message_id })
    }

    fn default_sender(&self) -> &str {
        &self.config.default_sender
    }

    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn health_check(&self) -> MailResult<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| MailError::Delivery(format!("SMTP health check failed: {}", e)))
    }
}
