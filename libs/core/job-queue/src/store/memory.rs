//! In-process job store.
//!
//! All state sits behind one mutex, so each operation is a single critical
//! section. Useful for tests, local development and single-process deployments
//! that can afford to lose queued jobs on restart.

use super::{JobStore, LEASE_EXPIRED, QueueProbe};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{
    FailOutcome, Job, JobOptions, JobPayload, JobState, QueueCounts, saturating_add,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

struct Entry<P> {
    job: Job<P>,
    /// Enqueue order, breaks ties between jobs due at the same instant
    seq: u64,
}

struct State<P> {
    jobs: HashMap<Uuid, Entry<P>>,
    next_seq: u64,
    /// Terminal jobs, oldest first
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
}

impl<P> Default for State<P> {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
            next_seq: 0,
            completed: VecDeque::new(),
            failed: VecDeque::new(),
        }
    }
}

/// Job store backed by process memory.
pub struct MemoryJobStore<P> {
    config: QueueConfig,
    state: Mutex<State<P>>,
}

impl<P: JobPayload> MemoryJobStore<P> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn fail_locked(
        &self,
        state: &mut State<P>,
        job_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        let entry = state
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        let job = &mut entry.job;

        if job.state != JobState::Active {
            return Err(QueueError::InvalidTransition {
                id: job_id,
                state: job.state,
            });
        }

        job.attempt_count += 1;
        job.last_error = Some(error.to_string());
        job.leased_until = None;

        if job.attempt_count >= job.max_attempts {
            job.state = JobState::Failed;
            job.finished_at = Some(now);
            let attempt_count = job.attempt_count;

            state.failed.push_back(job_id);
            prune(&mut state.jobs, &mut state.failed, self.config.retention.keep_failed);

            return Ok(FailOutcome::Exhausted { attempt_count });
        }

        let delay = self.config.backoff.delay_for(job.attempt_count);
        let retry_at = saturating_add(now, delay);
        job.state = JobState::Pending;
        job.available_at = retry_at;

        Ok(FailOutcome::Retrying {
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            retry_at,
        })
    }
}

/// Drop the oldest terminal jobs beyond `keep`.
fn prune<P>(jobs: &mut HashMap<Uuid, Entry<P>>, order: &mut VecDeque<Uuid>, keep: usize) {
    while order.len() > keep {
        if let Some(oldest) = order.pop_front() {
            jobs.remove(&oldest);
        }
    }
}

#[async_trait]
impl<P: JobPayload> JobStore<P> for MemoryJobStore<P> {
    async fn enqueue(&self, payload: P, options: JobOptions) -> QueueResult<Uuid> {
        let job = Job::new(payload, options, Utc::now());
        let id = job.id;

        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(id, Entry { job, seq });

        debug!(queue = %self.config.name, job_id = %id, "Job enqueued");
        Ok(id)
    }

    async fn lease_next(&self) -> QueueResult<Option<Job<P>>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let next = state
            .jobs
            .values()
            .filter(|entry| entry.job.is_eligible(now))
            .min_by_key(|entry| (entry.job.available_at, entry.seq))
            .map(|entry| entry.job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let entry = state.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        entry.job.state = JobState::Active;
        entry.job.leased_until = Some(saturating_add(now, self.config.lease_ttl));

        Ok(Some(entry.job.clone()))
    }

    async fn complete(&self, job_id: Uuid) -> QueueResult<()> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let entry = state
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;

        match entry.job.state {
            JobState::Completed => Ok(()),
            JobState::Active => {
                entry.job.state = JobState::Completed;
                entry.job.leased_until = None;
                entry.job.finished_at = Some(Utc::now());

                state.completed.push_back(job_id);
                let keep = self.config.retention.keep_completed;
                prune(&mut state.jobs, &mut state.completed, keep);
                Ok(())
            }
            other => Err(QueueError::InvalidTransition {
                id: job_id,
                state: other,
            }),
        }
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> QueueResult<FailOutcome> {
        let mut state = self.state.lock().await;
        self.fail_locked(&mut state, job_id, error, Utc::now())
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<(Uuid, FailOutcome)>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|entry| entry.job.lease_expired(now))
            .map(|entry| entry.job.id)
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            let outcome = self.fail_locked(&mut state, id, LEASE_EXPIRED, now)?;
            warn!(queue = %self.config.name, job_id = %id, ?outcome, "Reclaimed expired lease");
            reclaimed.push((id, outcome));
        }

        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job<P>>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).map(|entry| entry.job.clone()))
    }
}

#[async_trait]
impl<P: JobPayload> QueueProbe for MemoryJobStore<P> {
    async fn counts(&self) -> QueueResult<QueueCounts> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.jobs.values() {
            match entry.job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.config.name
    }
}
