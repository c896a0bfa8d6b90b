use chrono::{DateTime, Utc};
use job_queue::{DEFAULT_MAX_ATTEMPTS, JobOptions, MAX_DELAY_MS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Payload carried by every mail job.
///
/// `from` is the sender's display name (or a full address); providers turn it
/// into a mailbox with [`format_sender`](crate::providers::format_sender).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPayload {
    pub to: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub from: String,
}

/// Authenticated caller on whose behalf mail is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub name: String,
}

impl Sender {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

fn validate_has_body(request: &SendMailRequest) -> Result<(), ValidationError> {
    let present = |body: &Option<String>| body.as_deref().is_some_and(|b| !b.is_empty());
    if present(&request.text) || present(&request.html) {
        Ok(())
    } else {
        let mut err = ValidationError::new("missing_body");
        err.message = Some("either text or html is required".into());
        Err(err)
    }
}

/// Plain message request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_has_body"))]
pub struct SendMailRequest {
    #[validate(email)]
    pub to: String,

    #[validate(length(min = 1))]
    pub subject: String,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub html: Option<String>,

    /// Milliseconds before the job becomes eligible (at most one year)
    #[serde(default)]
    #[validate(range(max = MAX_DELAY_MS))]
    pub delay: Option<u64>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub attempts: Option<u32>,
}

impl SendMailRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            text: Some(text.into()),
            html: None,
            delay: None,
            attempts: None,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn job_options(&self) -> JobOptions {
        job_options(self.delay, self.attempts)
    }
}

/// Request to render a stored template and send the result.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendTemplateRequest {
    #[serde(alias = "templateId")]
    pub template_id: Uuid,

    #[serde(default)]
    pub data: Map<String, Value>,

    #[validate(email)]
    pub to: String,

    #[validate(length(min = 1))]
    pub subject: String,

    #[serde(default)]
    #[validate(range(max = MAX_DELAY_MS))]
    pub delay: Option<u64>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub attempts: Option<u32>,
}

impl SendTemplateRequest {
    pub fn new(template_id: Uuid, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            template_id,
            data: Map::new(),
            to: to.into(),
            subject: subject.into(),
            delay: None,
            attempts: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn job_options(&self) -> JobOptions {
        job_options(self.delay, self.attempts)
    }
}

fn job_options(delay: Option<u64>, attempts: Option<u32>) -> JobOptions {
    JobOptions::new()
        .with_delay_ms(delay.unwrap_or(0))
        .with_max_attempts(attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
}

/// Stored HTML template, owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn new(owner_id: Uuid, name: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            name: name.into(),
            html: html.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of a successful compile. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    pub html: String,
    pub data: Map<String, Value>,
}
