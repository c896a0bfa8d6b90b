//! Job Queue
//!
//! A durable delayed job queue with leases, bounded retries and retention,
//! plus the worker loop that consumes it.
//!
//! ## Features
//!
//! - **Two stores**: `RedisJobStore` (Lua scripts, atomic transitions) and
//!   `MemoryJobStore` (single mutex) behind the `JobStore` trait
//! - **Leases**: at most one active lease per job; expired leases are reclaimed
//! - **Retries**: explicit `BackoffPolicy`, terminal `failed` state after
//!   `max_attempts`
//! - **Retention**: bounded completed and failed history, oldest pruned first
//! - **Worker**: timeout-bounded dispatch, panic containment, graceful shutdown
//! - **Observability**: `JobEvent` sinks, Prometheus metrics, health router
//!
//! ## Example
//!
//! ```rust,ignore
//! use job_queue::{JobOptions, JobStore, QueueConfig, QueueDef, RedisJobStore, Worker, WorkerConfig};
//!
//! struct InvoiceQueue;
//! impl QueueDef for InvoiceQueue {
//!     const QUEUE_NAME: &'static str = "invoices";
//!     const KEY_PREFIX: &'static str = "billing:{invoices}";
//! }
//!
//! let store = Arc::new(RedisJobStore::new(redis, QueueConfig::from_queue_def::<InvoiceQueue>()));
//! store.enqueue(invoice, JobOptions::new().with_max_attempts(5)).await?;
//!
//! let worker = Worker::new(store, Arc::new(handler), "invoices", WorkerConfig::new());
//! worker.run(shutdown_rx).await?;
//! ```

mod backoff;
mod config;
mod error;
mod event;
mod health;
mod job;
pub mod metrics;
mod registry;
mod store;
mod worker;

pub use backoff::{BackoffPolicy, retry_with_backoff};
pub use config::{QueueConfig, RetentionPolicy, WorkerConfig};
pub use error::{QueueError, QueueResult};
pub use event::{ChannelEventSink, EventSink, JobEvent, TracingEventSink};
pub use health::{HealthState, health_router};
pub use job::{
    DEFAULT_MAX_ATTEMPTS, FailOutcome, Job, JobOptions, JobPayload, JobState, MAX_DELAY_MS,
    QueueCounts,
};
pub use metrics::{QueueMetrics, init_metrics};
pub use registry::{JobHandler, QueueDef};
pub use store::{
    JobStore, LEASE_EXPIRED, MemoryJobStore, QueueProbe, RedisJobStore, connect, connect_with_retry,
};
pub use worker::Worker;
