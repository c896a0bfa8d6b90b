//! The lease/dispatch/resolve loop.
//!
//! Each loop iteration leases at most one job, runs the handler in its own task
//! bounded by `dispatch_timeout`, and resolves the lease through the store:
//! `complete` on success, `fail` on error, timeout or panic. Failures never
//! leave the loop; they become store transitions and [`JobEvent`]s.
//!
//! Several workers may share one store. Correctness relies only on the store's
//! lease atomicity, not on any coordination between workers.

use crate::config::WorkerConfig;
use crate::error::{QueueError, QueueResult};
use crate::event::{EventSink, JobEvent, TracingEventSink};
use crate::job::{FailOutcome, Job, JobPayload};
use crate::metrics::QueueMetrics;
use crate::registry::JobHandler;
use crate::store::{JobStore, LEASE_EXPIRED};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_BACKOFF_SECS: u64 = 30;

/// Generic queue worker.
pub struct Worker<P, H>
where
    P: JobPayload,
    H: JobHandler<P>,
{
    store: Arc<dyn JobStore<P>>,
    handler: Arc<H>,
    queue_name: String,
    config: WorkerConfig,
    events: Arc<dyn EventSink>,
    metrics: QueueMetrics,
}

impl<P, H> Clone for Worker<P, H>
where
    P: JobPayload,
    H: JobHandler<P>,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            handler: self.handler.clone(),
            queue_name: self.queue_name.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<P, H> Worker<P, H>
where
    P: JobPayload,
    H: JobHandler<P> + 'static,
{
    pub fn new(
        store: Arc<dyn JobStore<P>>,
        handler: Arc<H>,
        queue_name: impl Into<String>,
        config: WorkerConfig,
    ) -> Self {
        let queue_name = queue_name.into();
        let metrics = QueueMetrics::new(queue_name.clone(), handler.name());

        Self {
            store,
            handler,
            queue_name,
            config,
            events: Arc::new(TracingEventSink),
            metrics,
        }
    }

    /// Replace the default tracing sink.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Run the worker loop until `shutdown` flips to `true` (or its sender is
    /// dropped). An in-flight dispatch is always resolved before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            queue = %self.queue_name,
            handler = %self.handler.name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            dispatch_timeout_ms = self.config.dispatch_timeout.as_millis() as u64,
            "Starting job worker"
        );

        let mut last_reclaim: Option<Instant> = None;
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!(worker_id = %self.config.worker_id, "Received shutdown signal, stopping worker");
                break;
            }

            if last_reclaim.is_none_or(|at| at.elapsed() >= self.config.reclaim_interval) {
                self.reclaim().await;
                last_reclaim = Some(Instant::now());
            }

            let wait = match self.store.lease_next().await {
                Ok(Some(job)) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Queue store recovered");
                        consecutive_errors = 0;
                    }
                    self.dispatch(job).await;
                    continue;
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    self.config.poll_interval
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.metrics.store_error();
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                    warn!(
                        error = %e,
                        consecutive_errors,
                        backoff_secs,
                        "Failed to lease job, backing off"
                    );
                    Duration::from_secs(backoff_secs)
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!(worker_id = %self.config.worker_id, "Shutdown channel closed, stopping worker");
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "Job worker stopped");
        Ok(())
    }

    /// Lease and resolve a single job. Returns the emitted event, or `None`
    /// when nothing was eligible.
    pub async fn run_once(&self) -> QueueResult<Option<JobEvent>> {
        match self.store.lease_next().await? {
            Some(job) => Ok(self.dispatch(job).await),
            None => Ok(None),
        }
    }

    /// Spawn `config.concurrency` copies of this worker, each with its own id.
    pub fn spawn_pool(&self, shutdown: watch::Receiver<bool>) -> JoinSet<QueueResult<()>> {
        let mut set = JoinSet::new();
        for index in 0..self.config.concurrency.max(1) {
            let mut worker = self.clone();
            worker.config.worker_id = format!("{}-{}", self.config.worker_id, index);
            let shutdown = shutdown.clone();
            set.spawn(async move { worker.run(shutdown).await });
        }
        set
    }

    /// Fail every job whose lease ran out and emit its event, as if the
    /// dispatch that held the lease had failed.
    async fn reclaim(&self) -> Vec<JobEvent> {
        let reclaimed = match self.store.reclaim_expired().await {
            Ok(reclaimed) => reclaimed,
            Err(e) => {
                warn!(queue = %self.queue_name, error = %e, "Failed to reclaim expired leases");
                return Vec::new();
            }
        };

        if reclaimed.is_empty() {
            return Vec::new();
        }

        self.metrics.leases_reclaimed(reclaimed.len());
        warn!(queue = %self.queue_name, count = reclaimed.len(), "Reclaimed jobs with expired leases");

        reclaimed
            .into_iter()
            .map(|(job_id, outcome)| {
                self.failure_event(job_id, outcome, LEASE_EXPIRED.to_string(), Duration::ZERO)
            })
            .collect()
    }

    /// Record metrics for a failed attempt and emit the matching event.
    fn failure_event(
        &self,
        job_id: Uuid,
        outcome: FailOutcome,
        cause: String,
        latency: Duration,
    ) -> JobEvent {
        let event = match outcome {
            FailOutcome::Retrying {
                attempt_count,
                max_attempts,
                retry_at,
            } => {
                self.metrics.job_retried();
                JobEvent::Retrying {
                    queue: self.queue_name.clone(),
                    job_id,
                    attempt: attempt_count,
                    max_attempts,
                    retry_at,
                    error: cause,
                    latency,
                }
            }
            FailOutcome::Exhausted { attempt_count } => {
                self.metrics.job_failed();
                JobEvent::Failed {
                    queue: self.queue_name.clone(),
                    job_id,
                    attempt: attempt_count,
                    error: cause,
                    latency,
                }
            }
        };
        self.events.emit(&event);
        event
    }

    /// Run the handler for a leased job and resolve the lease.
    async fn dispatch(&self, job: Job<P>) -> Option<JobEvent> {
        let job_id = job.id;
        let attempt = job.attempt_count + 1;
        self.metrics.job_leased();
        debug!(job_id = %job_id, attempt, max_attempts = job.max_attempts, "Dispatching job");

        let started = Instant::now();
        let outcome = self.invoke_handler(job).await;
        let latency = started.elapsed();

        match outcome {
            Ok(()) => match self.store.complete(job_id).await {
                Ok(()) => {
                    self.metrics.job_completed(latency);
                    let event = JobEvent::Completed {
                        queue: self.queue_name.clone(),
                        job_id,
                        attempt,
                        latency,
                    };
                    self.events.emit(&event);
                    Some(event)
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Job succeeded but could not be marked completed");
                    None
                }
            },
            Err(cause) => match self.store.fail(job_id, &cause).await {
                Ok(outcome) => Some(self.failure_event(job_id, outcome, cause, latency)),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, cause = %cause, "Job failed and could not be marked failed");
                    None
                }
            },
        }
    }

    /// Handler result as `Err(cause)` for errors, timeouts and panics alike.
    async fn invoke_handler(&self, job: Job<P>) -> Result<(), String> {
        let handler = self.handler.clone();
        let task = tokio::spawn(async move { handler.handle(&job).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.config.dispatch_timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(join_error)) if join_error.is_panic() => Err("job handler panicked".to_string()),
            Ok(Err(join_error)) => Err(format!("job handler was cancelled: {}", join_error)),
            Err(_) => {
                abort.abort();
                self.metrics.dispatch_timed_out();
                let timeout_ms = u64::try_from(self.config.dispatch_timeout.as_millis())
                    .unwrap_or(u64::MAX);
                Err(QueueError::Timeout(timeout_ms).to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use crate::config::QueueConfig;
    use crate::event::ChannelEventSink;
    use crate::job::{JobOptions, JobState};
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler<String> for FlakyHandler {
        async fn handle(&self, _job: &Job<String>) -> Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(QueueError::processing(format!("transient failure {}", call + 1)))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler<String> for SlowHandler {
        async fn handle(&self, _job: &Job<String>) -> Result<(), QueueError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler<String> for PanickingHandler {
        async fn handle(&self, _job: &Job<String>) -> Result<(), QueueError> {
            panic!("handler bug");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    fn memory_store() -> Arc<MemoryJobStore<String>> {
        Arc::new(MemoryJobStore::new(
            QueueConfig::new("test").with_backoff(BackoffPolicy::immediate()),
        ))
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_dispatch_timeout(Duration::from_millis(200))
    }

    fn build_worker<H: JobHandler<String> + 'static>(
        store: &Arc<MemoryJobStore<String>>,
        handler: H,
    ) -> Worker<String, H> {
        Worker::new(store.clone(), Arc::new(handler), "test", worker_config())
    }

    #[tokio::test]
    async fn test_run_once_on_empty_queue() {
        let store = memory_store();
        let worker = build_worker(&store, FlakyHandler::new(0));
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fails_twice_then_completes() {
        let store = memory_store();
        let id = store
            .enqueue("hello".into(), JobOptions::new().with_max_attempts(3))
            .await
            .unwrap();
        let worker = build_worker(&store, FlakyHandler::new(2));

        let first = worker.run_once().await.unwrap().unwrap();
        assert_eq!(first.outcome(), "retrying");
        assert_eq!(first.attempt(), 1);

        let second = worker.run_once().await.unwrap().unwrap();
        assert_eq!(second.outcome(), "retrying");
        assert_eq!(second.attempt(), 2);

        let third = worker.run_once().await.unwrap().unwrap();
        assert_eq!(third.outcome(), "completed");
        assert_eq!(third.attempt(), 3);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_job_emits_failed_event() {
        let store = memory_store();
        let id = store
            .enqueue("doomed".into(), JobOptions::new().with_max_attempts(2))
            .await
            .unwrap();
        let (sink, mut events) = ChannelEventSink::new();
        let worker = build_worker(&store, FlakyHandler::new(u32::MAX)).with_events(Arc::new(sink));

        worker.run_once().await.unwrap();
        worker.run_once().await.unwrap();
        assert!(worker.run_once().await.unwrap().is_none());

        assert_eq!(events.recv().await.unwrap().outcome(), "retrying");
        match events.recv().await.unwrap() {
            JobEvent::Failed {
                job_id,
                attempt,
                error,
                ..
            } => {
                assert_eq!(job_id, id);
                assert_eq!(attempt, 2);
                assert!(error.contains("transient failure 2"));
            }
            other => panic!("expected failed event, got {:?}", other),
        }

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempt_count, job.max_attempts);
    }

    #[tokio::test]
    async fn test_timeout_is_routed_through_fail() {
        let store = memory_store();
        let id = store.enqueue("slow".into(), JobOptions::default()).await.unwrap();
        let worker = build_worker(&store, SlowHandler);

        let event = worker.run_once().await.unwrap().unwrap();
        assert_eq!(event.outcome(), "retrying");

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let store = memory_store();
        let id = store
            .enqueue("boom".into(), JobOptions::new().with_max_attempts(1))
            .await
            .unwrap();
        let worker = build_worker(&store, PanickingHandler);

        let event = worker.run_once().await.unwrap().unwrap();
        assert_eq!(event.outcome(), "failed");

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some("job handler panicked"));
    }

    #[tokio::test]
    async fn test_expired_lease_on_last_attempt_emits_failed_event() {
        let store = Arc::new(MemoryJobStore::new(
            QueueConfig::new("test")
                .with_backoff(BackoffPolicy::immediate())
                .with_lease_ttl(Duration::from_millis(20)),
        ));
        let id = store
            .enqueue("orphaned".into(), JobOptions::new().with_max_attempts(1))
            .await
            .unwrap();
        store.lease_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (sink, mut events) = ChannelEventSink::new();
        let worker = build_worker(&store, FlakyHandler::new(0)).with_events(Arc::new(sink));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            JobEvent::Failed {
                job_id,
                attempt,
                error,
                ..
            } => {
                assert_eq!(job_id, id);
                assert_eq!(attempt, 1);
                assert_eq!(error, LEASE_EXPIRED);
            }
            other => panic!("expected failed event, got {:?}", other),
        }

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_expired_lease_with_attempts_left_emits_retrying_event() {
        let store = Arc::new(MemoryJobStore::new(
            QueueConfig::new("test")
                .with_backoff(BackoffPolicy::immediate())
                .with_lease_ttl(Duration::from_millis(20)),
        ));
        let id = store
            .enqueue("orphaned".into(), JobOptions::new().with_max_attempts(3))
            .await
            .unwrap();
        store.lease_next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let (sink, mut events) = ChannelEventSink::new();
        let worker = build_worker(&store, FlakyHandler::new(0)).with_events(Arc::new(sink));

        let reclaimed = worker.reclaim().await;
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].outcome(), "retrying");
        assert_eq!(reclaimed[0].job_id(), id);
        assert_eq!(events.recv().await.unwrap().attempt(), 1);

        assert_eq!(worker.run_once().await.unwrap().unwrap().outcome(), "completed");
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops_on_shutdown() {
        let store = memory_store();
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(store.enqueue(format!("job-{}", i), JobOptions::default()).await.unwrap());
        }

        let (sink, mut events) = ChannelEventSink::new();
        let worker: Worker<String, FlakyHandler> = Worker::new(
            store.clone(),
            Arc::new(FlakyHandler::new(0)),
            "test",
            worker_config().with_concurrency(4),
        )
        .with_events(Arc::new(sink));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut pool = worker.spawn_pool(shutdown_rx);

        let mut completed = 0;
        while completed < ids.len() {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.outcome(), "completed");
            completed += 1;
        }

        shutdown_tx.send(true).unwrap();
        while let Some(result) = pool.join_next().await {
            result.unwrap().unwrap();
        }

        for id in ids {
            assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Completed);
        }
    }
}
