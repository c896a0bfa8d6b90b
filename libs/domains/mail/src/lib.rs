//! Mail Domain
//!
//! Queued mail delivery: templates, providers and the service producers call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Caller      │  ← send_plain / send_from_template
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   MailService   │  ← validates, compiles templates
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    JobStore     │  ← courier:{mail} queue (Redis)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ Worker + Mail-  │  ← leases jobs, retries with backoff
//! │   JobHandler    │
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  MailProvider   │  ← SMTP, Resend
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_mail::{MailQueue, MailService, SendMailRequest, Sender, TemplateCompiler};
//!
//! let store = Arc::new(RedisJobStore::new(redis, QueueConfig::from_queue_def::<MailQueue>()));
//! let service = MailService::new(store, "mail", TemplateCompiler::new(templates));
//!
//! let job_id = service
//!     .send_plain(SendMailRequest::new("bob@example.com", "Hi", "Hello"), &sender)
//!     .await?;
//! ```

pub mod error;
pub mod models;
pub mod processor;
pub mod providers;
pub mod queue;
pub mod service;
pub mod templates;

pub use error::{ErrorKind, MailError, MailResult};
pub use models::{CompiledMessage, MailPayload, SendMailRequest, SendTemplateRequest, Sender, Template};
pub use processor::MailJobHandler;
pub use providers::{
    MailProvider, MockProvider, OutgoingMail, ProviderReceipt, ResendProvider, SmtpProvider,
    format_sender, provider_from_env,
};
pub use queue::MailQueue;
pub use service::MailService;
pub use templates::{InMemoryTemplateRepository, TemplateCompiler, TemplateRepository};
