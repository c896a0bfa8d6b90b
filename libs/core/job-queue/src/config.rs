//! Queue and worker configuration

use crate::backoff::BackoffPolicy;
use crate::error::{QueueError, QueueResult};
use crate::registry::QueueDef;
use core_config::{ConfigError, env_optional, env_or_default, env_parse};
use std::time::Duration;
use uuid::Uuid;

/// How many terminal jobs the store keeps before pruning the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 1000,
            keep_failed: 5000,
        }
    }
}

/// Store-side configuration shared by producers and workers
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, used for logs and metric labels
    pub name: String,

    /// Prefix for every Redis key owned by this queue
    pub key_prefix: String,

    /// How long a lease stays valid before the job may be reclaimed
    pub lease_ttl: Duration,

    /// Delay policy for retryable failures
    pub backoff: BackoffPolicy,

    /// Terminal job retention
    pub retention: RetentionPolicy,
}

impl QueueConfig {
    /// Create a QueueConfig from a QueueDef
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        Self {
            name: Q::QUEUE_NAME.to_string(),
            key_prefix: Q::KEY_PREFIX.to_string(),
            lease_ttl: Duration::from_millis(Q::LEASE_TTL_MS),
            backoff: BackoffPolicy::default(),
            retention: RetentionPolicy {
                keep_completed: Q::KEEP_COMPLETED,
                keep_failed: Q::KEEP_FAILED,
            },
        }
    }

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key_prefix: format!("queue:{{{}}}", name),
            name,
            lease_ttl: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Overlay `{PREFIX}_*` environment variables on top of this config.
    ///
    /// Reads `{PREFIX}_QUEUE_PREFIX`, `{PREFIX}_LEASE_TTL_MS`, `{PREFIX}_BACKOFF`
    /// (`exponential` or `fixed`), `{PREFIX}_BACKOFF_BASE_MS`,
    /// `{PREFIX}_BACKOFF_MAX_MS`, `{PREFIX}_KEEP_COMPLETED`, `{PREFIX}_KEEP_FAILED`.
    pub fn with_env_overrides(mut self, prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);

        if let Some(key_prefix) = env_optional(&key("QUEUE_PREFIX")) {
            self.key_prefix = key_prefix;
        }

        let lease_ms = env_parse(&key("LEASE_TTL_MS"), duration_ms(self.lease_ttl))?;
        self.lease_ttl = Duration::from_millis(lease_ms);

        let base = Duration::from_millis(env_parse(
            &key("BACKOFF_BASE_MS"),
            self.backoff.base_ms(),
        )?);
        let max = Duration::from_millis(env_parse(&key("BACKOFF_MAX_MS"), self.backoff.max_ms())?);
        let kind = env_or_default(&key("BACKOFF"), self.backoff.kind());
        self.backoff = match kind.to_ascii_lowercase().as_str() {
            "fixed" => BackoffPolicy::fixed(base),
            "exponential" => BackoffPolicy::exponential(base, max),
            other => {
                return Err(ConfigError::ParseError {
                    key: key("BACKOFF"),
                    details: format!("expected 'fixed' or 'exponential', got '{}'", other),
                });
            }
        };

        self.retention = RetentionPolicy {
            keep_completed: env_parse(&key("KEEP_COMPLETED"), self.retention.keep_completed)?,
            keep_failed: env_parse(&key("KEEP_FAILED"), self.retention.keep_failed)?,
        };

        Ok(self)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

/// Configuration for a single worker loop
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID (auto-generated if not provided)
    pub worker_id: String,

    /// Sleep between polls when no job is eligible
    pub poll_interval: Duration,

    /// Upper bound on a single handler invocation
    pub dispatch_timeout: Duration,

    /// How often expired leases are swept back into the queue
    pub reclaim_interval: Duration,

    /// Number of worker loops a process should run
    pub concurrency: usize,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `{PREFIX}_WORKER_CONCURRENCY`, `{PREFIX}_POLL_INTERVAL_MS`,
    /// `{PREFIX}_DISPATCH_TIMEOUT_MS` and `{PREFIX}_RECLAIM_INTERVAL_MS`.
    pub fn with_env_overrides(mut self, prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);

        self.concurrency = env_parse(&key("WORKER_CONCURRENCY"), self.concurrency)?.max(1);
        self.poll_interval = Duration::from_millis(env_parse(
            &key("POLL_INTERVAL_MS"),
            duration_ms(self.poll_interval),
        )?);
        self.dispatch_timeout = Duration::from_millis(env_parse(
            &key("DISPATCH_TIMEOUT_MS"),
            duration_ms(self.dispatch_timeout),
        )?);
        self.reclaim_interval = Duration::from_millis(env_parse(
            &key("RECLAIM_INTERVAL_MS"),
            duration_ms(self.reclaim_interval),
        )?);

        Ok(self)
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    /// Set the number of worker loops (minimum 1)
    pub fn with_concurrency(mut self, count: usize) -> Self {
        self.concurrency = count.max(1);
        self
    }

    /// A dispatch must always finish before its lease can be reclaimed.
    pub fn validate(&self, lease_ttl: Duration) -> QueueResult<()> {
        if self.dispatch_timeout.is_zero() {
            return Err(QueueError::Config(
                "dispatch timeout must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_timeout >= lease_ttl {
            return Err(QueueError::Config(format!(
                "dispatch timeout ({}ms) must be shorter than the lease TTL ({}ms)",
                duration_ms(self.dispatch_timeout),
                duration_ms(lease_ttl)
            )));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_millis(500),
            dispatch_timeout: Duration::from_secs(30),
            reclaim_interval: Duration::from_secs(10),
            concurrency: 4,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrdersQueue;

    impl QueueDef for OrdersQueue {
        const QUEUE_NAME: &'static str = "orders";
        const KEY_PREFIX: &'static str = "shop:{orders}";
        const KEEP_COMPLETED: usize = 10;
    }

    #[test]
    fn test_from_queue_def() {
        let config = QueueConfig::from_queue_def::<OrdersQueue>();
        assert_eq!(config.name, "orders");
        assert_eq!(config.key_prefix, "shop:{orders}");
        assert_eq!(config.retention.keep_completed, 10);
        assert_eq!(config.retention.keep_failed, 5000);
        assert_eq!(config.lease_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_queue_config_env_overrides() {
        temp_env::with_vars(
            [
                ("ORDERS_LEASE_TTL_MS", Some("90000")),
                ("ORDERS_BACKOFF", Some("fixed")),
                ("ORDERS_BACKOFF_BASE_MS", Some("200")),
                ("ORDERS_KEEP_FAILED", Some("7")),
                ("ORDERS_QUEUE_PREFIX", None),
            ],
            || {
                let config = QueueConfig::new("orders")
                    .with_env_overrides("ORDERS")
                    .unwrap();
                assert_eq!(config.key_prefix, "queue:{orders}");
                assert_eq!(config.lease_ttl, Duration::from_secs(90));
                assert_eq!(config.backoff, BackoffPolicy::fixed(Duration::from_millis(200)));
                assert_eq!(config.retention.keep_failed, 7);
                assert_eq!(config.retention.keep_completed, 1000);
            },
        );
    }

    #[test]
    fn test_queue_config_rejects_unknown_backoff() {
        temp_env::with_var("ORDERS_BACKOFF", Some("linear"), || {
            let err = QueueConfig::new("orders")
                .with_env_overrides("ORDERS")
                .unwrap_err();
            assert!(err.to_string().contains("ORDERS_BACKOFF"));
        });
    }

    #[test]
    fn test_worker_config_env_overrides() {
        temp_env::with_vars(
            [
                ("ORDERS_WORKER_CONCURRENCY", Some("0")),
                ("ORDERS_DISPATCH_TIMEOUT_MS", Some("5000")),
            ],
            || {
                let config = WorkerConfig::new().with_env_overrides("ORDERS").unwrap();
                assert_eq!(config.concurrency, 1);
                assert_eq!(config.dispatch_timeout, Duration::from_secs(5));
                assert_eq!(config.poll_interval, Duration::from_millis(500));
            },
        );
    }

    #[test]
    fn test_worker_config_validate() {
        let config = WorkerConfig::new().with_dispatch_timeout(Duration::from_secs(30));
        assert!(config.validate(Duration::from_secs(60)).is_ok());
        assert!(config.validate(Duration::from_secs(30)).is_err());

        let zero = WorkerConfig::new().with_dispatch_timeout(Duration::ZERO);
        assert!(zero.validate(Duration::from_secs(60)).is_err());
    }
}
