//! Redis-backed job store.
//!
//! Layout under `key_prefix`:
//! - `job:<id>`: hash with the job record (payload stored as JSON)
//! - `pending`: sorted set, score = `available_at` (ms)
//! - `active`: sorted set, score = `leased_until` (ms)
//! - `completed`, `failed`: sorted sets, score = `finished_at` (ms)
//!
//! Every transition is one Lua script, so Redis applies it atomically. Scripts
//! touch job hashes derived from the prefix; keep a `{hash tag}` in the prefix
//! when running against a cluster.

use super::{JobStore, LEASE_EXPIRED, QueueProbe};
use crate::backoff::{BackoffPolicy, retry_with_backoff};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{FailOutcome, Job, JobOptions, JobPayload, JobState, QueueCounts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ENQUEUE_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1],
    'id', ARGV[1], 'payload', ARGV[2], 'state', 'pending', 'attempt_count', 0,
    'max_attempts', ARGV[3], 'delay_ms', ARGV[4], 'enqueued_at', ARGV[5],
    'available_at', ARGV[6])
redis.call('ZADD', KEYS[2], ARGV[6], ARGV[1])
return 1
"#;

const LEASE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[2], ARGV[2], id)
redis.call('HSET', ARGV[3] .. id, 'state', 'active', 'leased_until', ARGV[2])
return id
"#;

const COMPLETE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then
    return 'missing'
end
if state == 'completed' then
    return 'noop'
end
if state ~= 'active' then
    return 'invalid:' .. state
end
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[1], 'leased_until')
redis.call('HSET', KEYS[1], 'state', 'completed', 'finished_at', ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
local excess = redis.call('ZCARD', KEYS[3]) - tonumber(ARGV[3])
if excess > 0 then
    local stale = redis.call('ZRANGE', KEYS[3], 0, excess - 1)
    for _, old in ipairs(stale) do
        redis.call('DEL', ARGV[4] .. old)
    end
    redis.call('ZREMRANGEBYRANK', KEYS[3], 0, excess - 1)
end
return 'ok'
"#;

const FAIL_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then
    return 'missing'
end
if state ~= 'active' then
    return 'invalid:' .. state
end
if ARGV[9] ~= '' then
    local leased_until = tonumber(redis.call('HGET', KEYS[1], 'leased_until') or '0')
    if leased_until > tonumber(ARGV[9]) then
        return 'noop'
    end
end
local attempts = redis.call('HINCRBY', KEYS[1], 'attempt_count', 1)
local max_attempts = tonumber(redis.call('HGET', KEYS[1], 'max_attempts'))
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[1], 'leased_until')
redis.call('HSET', KEYS[1], 'last_error', ARGV[3])
if attempts >= max_attempts then
    redis.call('HSET', KEYS[1], 'state', 'failed', 'finished_at', ARGV[2])
    redis.call('ZADD', KEYS[4], ARGV[2], ARGV[1])
    local excess = redis.call('ZCARD', KEYS[4]) - tonumber(ARGV[7])
    if excess > 0 then
        local stale = redis.call('ZRANGE', KEYS[4], 0, excess - 1)
        for _, old in ipairs(stale) do
            redis.call('DEL', ARGV[8] .. old)
        end
        redis.call('ZREMRANGEBYRANK', KEYS[4], 0, excess - 1)
    end
    return 'failed:' .. attempts
end
local delay = tonumber(ARGV[5])
if ARGV[4] == 'exponential' then
    delay = math.min(delay * math.pow(2, attempts - 1), tonumber(ARGV[6]))
end
local retry_at = string.format('%.0f', tonumber(ARGV[2]) + delay)
redis.call('HSET', KEYS[1], 'state', 'pending', 'available_at', retry_at)
redis.call('ZADD', KEYS[3], retry_at, ARGV[1])
return 'retry:' .. attempts .. ':' .. max_attempts .. ':' .. retry_at
"#;

/// Connect to Redis and verify the connection with PING.
pub async fn connect(url: &str) -> QueueResult<ConnectionManager> {
    info!(url = %url, "Connecting to Redis");

    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!("Connected to Redis");
    Ok(manager)
}

/// Connect with exponential backoff (200ms doubling up to 5s) between attempts.
pub async fn connect_with_retry(url: &str, max_retries: u32) -> QueueResult<ConnectionManager> {
    let policy = BackoffPolicy::exponential(Duration::from_millis(200), Duration::from_secs(5));
    retry_with_backoff(|| connect(url), policy, max_retries).await
}

/// Job store persisted in Redis.
pub struct RedisJobStore<P> {
    redis: ConnectionManager,
    config: QueueConfig,
    enqueue_script: Script,
    lease_script: Script,
    complete_script: Script,
    fail_script: Script,
    _payload: PhantomData<fn() -> P>,
}

impl<P: JobPayload> RedisJobStore<P> {
    pub fn new(redis: ConnectionManager, config: QueueConfig) -> Self {
        Self {
            redis,
            config,
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            lease_script: Script::new(LEASE_SCRIPT),
            complete_script: Script::new(COMPLETE_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
            _payload: PhantomData,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.config.key_prefix, suffix)
    }

    fn job_key_prefix(&self) -> String {
        self.key("job:")
    }

    fn job_key(&self, id: Uuid) -> String {
        format!("{}{}", self.job_key_prefix(), id)
    }

    async fn fail_at(
        &self,
        job_id: Uuid,
        error: &str,
        now_ms: i64,
        expired_before: Option<i64>,
    ) -> QueueResult<Option<FailOutcome>> {
        let mut conn = self.redis.clone();
        let backoff = self.config.backoff;

        let reply: String = self
            .fail_script
            .key(self.job_key(job_id))
            .key(self.key("active"))
            .key(self.key("pending"))
            .key(self.key("failed"))
            .arg(job_id.to_string())
            .arg(now_ms)
            .arg(error)
            .arg(backoff.kind())
            .arg(backoff.base_ms())
            .arg(backoff.max_ms())
            .arg(self.config.retention.keep_failed)
            .arg(self.job_key_prefix())
            .arg(expired_before.map(|ms| ms.to_string()).unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        parse_fail_reply(job_id, &reply)
    }
}

#[async_trait]
impl<P: JobPayload> JobStore<P> for RedisJobStore<P> {
    async fn enqueue(&self, payload: P, options: JobOptions) -> QueueResult<Uuid> {
        let job = Job::new(payload, options, Utc::now());
        let payload = serde_json::to_string(&job.payload)?;
        let mut conn = self.redis.clone();

        let _: i64 = self
            .enqueue_script
            .key(self.job_key(job.id))
            .key(self.key("pending"))
            .arg(job.id.to_string())
            .arg(payload)
            .arg(job.max_attempts)
            .arg(job.delay_ms)
            .arg(job.enqueued_at.timestamp_millis())
            .arg(job.available_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        debug!(queue = %self.config.name, job_id = %job.id, delay_ms = job.delay_ms, "Job enqueued");
        Ok(job.id)
    }

    async fn lease_next(&self) -> QueueResult<Option<Job<P>>> {
        let now = Utc::now().timestamp_millis();
        let lease_ms = i64::try_from(self.config.lease_ttl.as_millis()).unwrap_or(i64::MAX);
        let mut conn = self.redis.clone();

        let leased: Option<String> = self
            .lease_script
            .key(self.key("pending"))
            .key(self.key("active"))
            .arg(now)
            .arg(now.saturating_add(lease_ms))
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        let Some(raw_id) = leased else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&raw_id)
            .map_err(|e| QueueError::Serialization(format!("bad job id '{}': {}", raw_id, e)))?;
        self.get(id).await
    }

    async fn complete(&self, job_id: Uuid) -> QueueResult<()> {
        let mut conn = self.redis.clone();

        let reply: String = self
            .complete_script
            .key(self.job_key(job_id))
            .key(self.key("active"))
            .key(self.key("completed"))
            .arg(job_id.to_string())
            .arg(Utc::now().timestamp_millis())
            .arg(self.config.retention.keep_completed)
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        match reply.as_str() {
            "ok" | "noop" => Ok(()),
            "missing" => Err(QueueError::NotFound(job_id)),
            other => Err(invalid_transition(job_id, other)),
        }
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> QueueResult<FailOutcome> {
        let now = Utc::now().timestamp_millis();
        self.fail_at(job_id, error, now, None)
            .await?
            .ok_or_else(|| QueueError::Serialization("unexpected no-op from fail".to_string()))
    }

    async fn reclaim_expired(&self) -> QueueResult<Vec<(Uuid, FailOutcome)>> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.redis.clone();

        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key("active"))
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await?;

        let mut reclaimed = Vec::new();
        for raw_id in expired {
            let Ok(id) = Uuid::parse_str(&raw_id) else {
                warn!(queue = %self.config.name, job_id = %raw_id, "Skipping malformed id in active set");
                continue;
            };

            // The owner may have resolved the job since the range read.
            match self.fail_at(id, LEASE_EXPIRED, now, Some(now)).await {
                Ok(Some(outcome)) => {
                    warn!(queue = %self.config.name, job_id = %id, ?outcome, "Reclaimed expired lease");
                    reclaimed.push((id, outcome));
                }
                Ok(None) | Err(QueueError::InvalidTransition { .. }) | Err(QueueError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reclaimed)
    }

    async fn get(&self, job_id: Uuid) -> QueueResult<Option<Job<P>>> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.job_key(job_id))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        job_from_fields(job_id, &fields).map(Some)
    }
}

#[async_trait]
impl<P: JobPayload> QueueProbe for RedisJobStore<P> {
    async fn counts(&self) -> QueueResult<QueueCounts> {
        let mut conn = self.redis.clone();
        let (pending, active, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("ZCARD")
            .arg(self.key("pending"))
            .cmd("ZCARD")
            .arg(self.key("active"))
            .cmd("ZCARD")
            .arg(self.key("completed"))
            .cmd("ZCARD")
            .arg(self.key("failed"))
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            pending,
            active,
            completed,
            failed,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.redis.clone();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!(
                "unexpected PING response: {}",
                response
            )))
        }
    }

    fn queue_name(&self) -> &str {
        &self.config.name
    }
}

fn invalid_transition(job_id: Uuid, reply: &str) -> QueueError {
    let state = reply
        .strip_prefix("invalid:")
        .and_then(|raw| JobState::from_str(raw).ok());

    match state {
        Some(state) => QueueError::InvalidTransition { id: job_id, state },
        None => QueueError::Serialization(format!("unexpected script reply '{}'", reply)),
    }
}

/// Decode the FAIL script reply. `Ok(None)` means the lease was still valid.
fn parse_fail_reply(job_id: Uuid, reply: &str) -> QueueResult<Option<FailOutcome>> {
    let malformed = || QueueError::Serialization(format!("unexpected script reply '{}'", reply));
    let mut parts = reply.split(':');

    match parts.next() {
        Some("noop") => Ok(None),
        Some("missing") => Err(QueueError::NotFound(job_id)),
        Some("invalid") => Err(invalid_transition(job_id, reply)),
        Some("failed") => {
            let attempt_count = parts.next().and_then(|n| n.parse().ok()).ok_or_else(malformed)?;
            Ok(Some(FailOutcome::Exhausted { attempt_count }))
        }
        Some("retry") => {
            let attempt_count = parts.next().and_then(|n| n.parse().ok()).ok_or_else(malformed)?;
            let max_attempts = parts.next().and_then(|n| n.parse().ok()).ok_or_else(malformed)?;
            let retry_at = parts
                .next()
                .and_then(|n| n.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(malformed)?;
            Ok(Some(FailOutcome::Retrying {
                attempt_count,
                max_attempts,
                retry_at,
            }))
        }
        _ => Err(malformed()),
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> QueueResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| QueueError::Serialization(format!("job record is missing '{}'", name)))
}

fn parse_number<T: FromStr>(fields: &HashMap<String, String>, name: &str) -> QueueResult<T> {
    required(fields, name)?
        .parse()
        .map_err(|_| QueueError::Serialization(format!("job field '{}' is not a number", name)))
}

fn parse_timestamp(fields: &HashMap<String, String>, name: &str) -> QueueResult<Option<DateTime<Utc>>> {
    match fields.get(name) {
        None => Ok(None),
        Some(_) => {
            let ms: i64 = parse_number(fields, name)?;
            DateTime::from_timestamp_millis(ms).map(Some).ok_or_else(|| {
                QueueError::Serialization(format!("job field '{}' is out of range", name))
            })
        }
    }
}

fn job_from_fields<P: JobPayload>(id: Uuid, fields: &HashMap<String, String>) -> QueueResult<Job<P>> {
    let missing = |name: &str| QueueError::Serialization(format!("job record is missing '{}'", name));
    let state = JobState::from_str(required(fields, "state")?)
        .map_err(|e| QueueError::Serialization(format!("bad job state: {}", e)))?;

    Ok(Job {
        id,
        payload: serde_json::from_str(required(fields, "payload")?)?,
        state,
        attempt_count: parse_number(fields, "attempt_count")?,
        max_attempts: parse_number(fields, "max_attempts")?,
        delay_ms: parse_number(fields, "delay_ms")?,
        enqueued_at: parse_timestamp(fields, "enqueued_at")?.ok_or_else(|| missing("enqueued_at"))?,
        available_at: parse_timestamp(fields, "available_at")?
            .ok_or_else(|| missing("available_at"))?,
        leased_until: parse_timestamp(fields, "leased_until")?,
        last_error: fields.get("last_error").cloned(),
        finished_at: parse_timestamp(fields, "finished_at")?,
    })
}
