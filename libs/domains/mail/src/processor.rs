//! Mail job handler for the queue worker.
//!
//! `MailJobHandler` implements `JobHandler<MailPayload>`: it resolves the
//! sender, hands the message to the configured provider and reports the
//! outcome back to the worker.

use crate::models::MailPayload;
use crate::providers::{MailProvider, OutgoingMail};
use async_trait::async_trait;
use job_queue::{Job, JobHandler, QueueError};
use std::sync::Arc;
use tracing::info;

/// Sends one mail job through a provider.
#[derive(Clone)]
pub struct MailJobHandler {
    provider: Arc<dyn MailProvider>,
}

impl MailJobHandler {
    pub fn new(provider: Arc<dyn MailProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl JobHandler<MailPayload> for MailJobHandler {
    async fn handle(&self, job: &Job<MailPayload>) -> Result<(), QueueError> {
        let mail = OutgoingMail::from_payload(&job.payload, self.provider.default_sender());

        info!(
            job_id = %job.id,
            to = %mail.to,
            attempt = job.attempt_count + 1,
            max_attempts = job.max_attempts,
            provider = self.provider.name(),
            "Processing mail job"
        );

        let receipt = self.provider.send(&mail).await?;

        info!(
            job_id = %job.id,
            to = %mail.to,
            message_id = ?receipt.message_id,
            "Mail delivered"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "MailJobHandler"
    }

    async fn health_check(&self) -> Result<bool, QueueError> {
        self.provider
            .health_check()
            .await
            .map_err(|e| QueueError::processing(e.to_string()))
    }
}
