//! Queue definitions and job handler trait.

use crate::error::QueueError;
use crate::job::{Job, JobPayload};
use async_trait::async_trait;

/// Static description of a queue.
///
/// # Example
///
/// ```rust,ignore
/// struct InvoiceQueue;
///
/// impl QueueDef for InvoiceQueue {
///     const QUEUE_NAME: &'static str = "invoices";
///     const KEY_PREFIX: &'static str = "billing:{invoices}";
/// }
///
/// let config = QueueConfig::from_queue_def::<InvoiceQueue>();
/// ```
pub trait QueueDef {
    /// Queue name for logs and metric labels
    const QUEUE_NAME: &'static str;

    /// Redis key prefix. Wrap the variable part in `{}` so every key of the
    /// queue hashes to the same cluster slot.
    const KEY_PREFIX: &'static str;

    /// Lease validity in milliseconds
    const LEASE_TTL_MS: u64 = 60_000;

    /// Completed jobs kept before pruning
    const KEEP_COMPLETED: usize = 1000;

    /// Failed jobs kept before pruning
    const KEEP_FAILED: usize = 5000;
}

/// Handles leased jobs of one payload type.
///
/// Return `Ok(())` when the work is done. Any `Err` counts as a failed attempt;
/// the worker decides between retry and terminal failure through the store.
#[async_trait]
pub trait JobHandler<P: JobPayload>: Send + Sync {
    async fn handle(&self, job: &Job<P>) -> Result<(), QueueError>;

    /// Handler name for logging and metric labels
    fn name(&self) -> &'static str;

    /// Default: always healthy.
    async fn health_check(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}
