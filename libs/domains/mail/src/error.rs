//! Error types for the mail domain.

use job_queue::QueueError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Coarse classification of a [`MailError`], stable for callers that map
/// errors onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Unavailable,
    Delivery,
    Internal,
}

/// Errors that can occur in the mail domain.
#[derive(Debug, Error)]
pub enum MailError {
    /// No template with this id for this owner.
    #[error("Template not found")]
    TemplateNotFound { owner_id: Uuid, template_id: Uuid },

    /// Template placeholders with no value in the supplied data.
    #[error("Missing variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// Request rejected by validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Template could not be parsed or rendered.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Job store unreachable. Safe to retry.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The provider did not accept the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailError::TemplateNotFound { .. } => ErrorKind::NotFound,
            MailError::MissingVariables(_) | MailError::InvalidInput(_) | MailError::Template(_) => {
                ErrorKind::InvalidInput
            }
            MailError::Unavailable(_) => ErrorKind::Unavailable,
            MailError::Delivery(_) => ErrorKind::Delivery,
            MailError::Config(_) | MailError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unavailable | ErrorKind::Delivery)
    }
}

impl From<QueueError> for MailError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(msg) => MailError::Unavailable(msg),
            other => MailError::Internal(other.to_string()),
        }
    }
}

/// Handler failures are reported to the queue as processing errors so the
/// worker routes them through `fail`.
impl From<MailError> for QueueError {
    fn from(err: MailError) -> Self {
        QueueError::processing(err.to_string())
    }
}

impl From<validator::ValidationErrors> for MailError {
    fn from(err: validator::ValidationErrors) -> Self {
        MailError::InvalidInput(err.to_string())
    }
}

impl From<handlebars::RenderError> for MailError {
    fn from(err: handlebars::RenderError) -> Self {
        MailError::Template(err.to_string())
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        MailError::Delivery(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailError::Delivery(format!("SMTP send failed: {}", err))
    }
}

impl From<core_config::ConfigError> for MailError {
    fn from(err: core_config::ConfigError) -> Self {
        MailError::Config(err.to_string())
    }
}
