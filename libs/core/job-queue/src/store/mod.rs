//! Job store abstraction and its backends.
//!
//! Every method of [`JobStore`] is a single atomic transition against the
//! backing store. In particular `lease_next` hands any given job to at most one
//! caller until that caller resolves it (or its lease expires and is reclaimed).

mod memory;
mod redis;

pub use memory::MemoryJobStore;
pub use redis::{RedisJobStore, connect, connect_with_retry};

use crate::error::QueueResult;
use crate::job::{FailOutcome, Job, JobOptions, JobPayload, QueueCounts};
use async_trait::async_trait;
use uuid::Uuid;

/// Error recorded when an expired lease is reclaimed.
pub const LEASE_EXPIRED: &str = "lease expired";

/// Durable store of jobs with delay, lease and retry semantics.
#[async_trait]
pub trait JobStore<P: JobPayload>: Send + Sync {
    /// Add a pending job. Only fails when the store is unreachable.
    async fn enqueue(&self, payload: P, options: JobOptions) -> QueueResult<Uuid>;

    /// Lease the earliest eligible pending job, if any, and mark it active.
    async fn lease_next(&self) -> QueueResult<Option<Job<P>>>;

    /// `active -> completed`. Completing an already completed job is a no-op.
    async fn complete(&self, job_id: Uuid) -> QueueResult<()>;

    /// Record a failed attempt: back to pending after backoff, or failed once
    /// the attempt budget is spent.
    async fn fail(&self, job_id: Uuid, error: &str) -> QueueResult<FailOutcome>;

    /// Route every active job whose lease has expired through `fail`.
    /// Returns the outcome for each reclaimed job.
    async fn reclaim_expired(&self) -> QueueResult<Vec<(Uuid, FailOutcome)>>;

    /// Snapshot of a job, `None` when unknown or pruned.
    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job<P>>>;
}

/// Payload-agnostic view of a queue for health endpoints and gauges.
#[async_trait]
pub trait QueueProbe: Send + Sync {
    async fn counts(&self) -> QueueResult<QueueCounts>;

    /// Verify the backing store answers.
    async fn ping(&self) -> QueueResult<()>;

    fn queue_name(&self) -> &str;
}
