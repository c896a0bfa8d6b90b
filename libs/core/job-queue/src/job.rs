//! Job model: payload envelope, lifecycle state and enqueue options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Default number of dispatch attempts for a job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Longest accepted enqueue delay (one year). Longer delays are clamped.
pub const MAX_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// `at + duration`, saturating at the latest representable instant.
pub(crate) fn saturating_add(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Marker trait for anything that can ride in a job.
///
/// Blanket-implemented for every serializable, cloneable, thread-safe type.
pub trait JobPayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> JobPayload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Lifecycle state of a job.
///
/// `Pending -> Active -> (Completed | Failed)`, with `Active -> Pending` on a
/// retryable failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Options supplied at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Delay before the job first becomes eligible
    pub delay: Duration,
    /// Total dispatch attempts before the job is marked failed
    pub max_attempts: u32,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the enqueue delay (at most [`MAX_DELAY_MS`])
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay.min(Duration::from_millis(MAX_DELAY_MS));
        self
    }

    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        self.with_delay(Duration::from_millis(delay_ms))
    }

    /// Set the attempt budget (minimum 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A unit of work tracked by a [`JobStore`](crate::JobStore).
///
/// Only the store mutates `state`, `attempt_count` and the timestamps; callers
/// receive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<P> {
    pub id: Uuid,
    pub payload: P,
    pub state: JobState,
    /// Failed dispatches so far
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Delay requested at enqueue time
    pub delay_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest instant the job may be leased
    pub available_at: DateTime<Utc>,
    /// Lease expiry while `Active`
    pub leased_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl<P> Job<P> {
    /// Build a fresh pending job. Ids are UUIDv7, so they sort by creation time.
    pub fn new(payload: P, options: JobOptions, now: DateTime<Utc>) -> Self {
        let delay = options.delay.min(Duration::from_millis(MAX_DELAY_MS));
        Self {
            id: Uuid::now_v7(),
            payload,
            state: JobState::Pending,
            attempt_count: 0,
            max_attempts: options.max_attempts.max(1),
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(MAX_DELAY_MS),
            enqueued_at: now,
            available_at: saturating_add(now, delay),
            leased_until: None,
            last_error: None,
            finished_at: None,
        }
    }

    /// Pending and due at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.available_at <= now
    }

    /// Active with a lease that ran out at or before `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.leased_until.is_some_and(|until| until <= now)
    }
}

/// Result of routing a failed dispatch through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, eligible again at `retry_at`
    Retrying {
        attempt_count: u32,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
    },
    /// Attempt budget exhausted, job is now failed
    Exhausted { attempt_count: u32 },
}

impl FailOutcome {
    pub fn attempt_count(&self) -> u32 {
        match self {
            FailOutcome::Retrying { attempt_count, .. } => *attempt_count,
            FailOutcome::Exhausted { attempt_count } => *attempt_count,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FailOutcome::Exhausted { .. })
    }
}

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.active + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_job_options_defaults() {
        let options = JobOptions::default();
        assert_eq!(options.delay, Duration::ZERO);
        assert_eq!(options.max_attempts, 3);
    }

    #[test]
    fn test_max_attempts_clamps_to_one() {
        let options = JobOptions::new().with_max_attempts(0);
        assert_eq!(options.max_attempts, 1);
    }

    #[test]
    fn test_new_job_respects_delay() {
        let now = Utc::now();
        let job = Job::new("payload", JobOptions::new().with_delay_ms(1500), now);

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.delay_ms, 1500);
        assert!(!job.is_eligible(now));
        assert!(job.is_eligible(now + chrono::Duration::milliseconds(1500)));
    }

    #[test]
    fn test_oversized_delay_is_clamped_not_dropped() {
        let now = Utc::now();
        let year = chrono::Duration::milliseconds(MAX_DELAY_MS as i64);

        let job = Job::new(1u8, JobOptions::new().with_delay_ms(u64::MAX), now);
        assert!(!job.is_eligible(now));
        assert_eq!(job.delay_ms, MAX_DELAY_MS);
        assert_eq!(job.available_at, now + year);

        let job = Job::new(1u8, JobOptions::new().with_delay_ms(10_000_000_000_000_000), now);
        assert!(!job.is_eligible(now + chrono::Duration::days(30)));

        let options = JobOptions {
            delay: Duration::MAX,
            max_attempts: 1,
        };
        let job = Job::new(1u8, options, now);
        assert_eq!(job.available_at, now + year);
    }

    #[test]
    fn test_saturating_add_never_overflows() {
        let late = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1);
        assert_eq!(saturating_add(late, Duration::from_secs(60)), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_add(late, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_state_string_forms() {
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert_eq!(JobState::from_str("active").unwrap(), JobState::Active);
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
    }

    #[test]
    fn test_lease_expired() {
        let now = Utc::now();
        let mut job = Job::new(1u8, JobOptions::default(), now);
        assert!(!job.lease_expired(now));

        job.state = JobState::Active;
        job.leased_until = Some(now - chrono::Duration::seconds(1));
        assert!(job.lease_expired(now));
    }
}
