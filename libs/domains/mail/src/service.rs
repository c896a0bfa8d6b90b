//! Mail orchestration service.
//!
//! Entry point for producers: validates requests, renders templates when
//! asked to, and enqueues a uniform [`MailPayload`] for the worker.

use crate::error::MailResult;
use crate::models::{MailPayload, SendMailRequest, SendTemplateRequest, Sender};
use crate::templates::TemplateCompiler;
use job_queue::{JobOptions, JobStore, metrics};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Queues mail jobs on behalf of authenticated senders.
#[derive(Clone)]
pub struct MailService {
    queue: Arc<dyn JobStore<MailPayload>>,
    queue_name: String,
    compiler: TemplateCompiler,
}

impl MailService {
    pub fn new(
        queue: Arc<dyn JobStore<MailPayload>>,
        queue_name: impl Into<String>,
        compiler: TemplateCompiler,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            compiler,
        }
    }

    /// Queue a plain message. Returns the job id.
    pub async fn send_plain(&self, request: SendMailRequest, sender: &Sender) -> MailResult<Uuid> {
        request.validate()?;

        let options = request.job_options();
        let payload = MailPayload {
            to: request.to,
            subject: request.subject,
            text: request.text,
            html: request.html,
            from: sender.name.clone(),
        };

        self.enqueue(payload, options).await
    }

    /// Render one of the sender's templates and queue the result.
    ///
    /// Nothing is enqueued when the template is missing or the data does not
    /// cover every placeholder.
    pub async fn send_from_template(
        &self,
        request: SendTemplateRequest,
        sender: &Sender,
    ) -> MailResult<Uuid> {
        request.validate()?;

        let options = request.job_options();
        let compiled = self
            .compiler
            .compile(sender.id, request.template_id, request.data)
            .await?;

        let payload = MailPayload {
            to: request.to,
            subject: request.subject,
            text: None,
            html: Some(compiled.html),
            from: sender.name.clone(),
        };

        self.enqueue(payload, options).await
    }

    async fn enqueue(&self, payload: MailPayload, options: JobOptions) -> MailResult<Uuid> {
        let to = payload.to.clone();
        let job_id = self.queue.enqueue(payload, options).await?;
        metrics::job_enqueued(&self.queue_name);

        info!(
            job_id = %job_id,
            queue = %self.queue_name,
            to = %to,
            delay_ms = options.delay.as_millis() as u64,
            max_attempts = options.max_attempts,
            "Queued mail job"
        );

        Ok(job_id)
    }
}
