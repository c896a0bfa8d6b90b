//! Mock provider for tests and local runs without a transport.

use super::{FALLBACK_SENDER, MailProvider, OutgoingMail, ProviderReceipt};
use crate::error::{MailError, MailResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Mock provider that captures sent mail.
///
/// Can be scripted to fail the first N sends, which is how retry paths are
/// exercised end to end.
#[derive(Clone, Default)]
pub struct MockProvider {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    calls: Arc<AtomicUsize>,
    fail_first: usize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` sends, then accept.
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    /// Fail every send.
    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    /// Mail accepted so far, in send order.
    pub async fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Every `send` call, accepted or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for MockProvider {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<ProviderReceipt> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(MailError::Delivery(format!(
                "mock transport rejected send #{}",
                call + 1
            )));
        }

        let mut sent = self.sent.lock().await;
        sent.push(mail.clone());
        Ok(ProviderReceipt {
            message_id: Some(format!("mock-{}", sent.len())),
        })
    }

    fn default_sender(&self) -> &str {
        FALLBACK_SENDER
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> MailResult<bool> {
        Ok(true)
    }
}
