//! Prometheus metrics for job queues and workers

use crate::error::{QueueError, QueueResult};
use crate::job::QueueCounts;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> QueueResult<()> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| QueueError::Config(format!("failed to install metrics recorder: {}", e)))?;
        info!("Prometheus metrics initialized");
        Ok::<_, QueueError>(handle)
    })?;
    Ok(())
}

/// Render metrics in Prometheus text format, `None` before `init_metrics`.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

/// Metric helpers labelled by queue and handler
#[derive(Clone, Debug)]
pub struct QueueMetrics {
    queue: String,
    handler: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            handler: handler.into(),
        }
    }

    pub fn job_leased(&self) {
        counter!(
            "job_queue_jobs_leased_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_completed(&self, duration: Duration) {
        counter!(
            "job_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => "completed"
        )
        .increment(1);

        histogram!(
            "job_queue_dispatch_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(&self) {
        counter!(
            "job_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => "retrying"
        )
        .increment(1);
    }

    pub fn job_failed(&self) {
        counter!(
            "job_queue_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "status" => "failed"
        )
        .increment(1);
    }

    pub fn dispatch_timed_out(&self) {
        counter!(
            "job_queue_dispatch_timeouts_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn leases_reclaimed(&self, count: usize) {
        counter!(
            "job_queue_leases_reclaimed_total",
            "queue" => self.queue.clone()
        )
        .increment(count as u64);
    }

    pub fn store_error(&self) {
        counter!(
            "job_queue_store_errors_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    /// Per-state depth gauges
    pub fn queue_depth(&self, counts: &QueueCounts) {
        for (state, value) in [
            ("pending", counts.pending),
            ("active", counts.active),
            ("completed", counts.completed),
            ("failed", counts.failed),
        ] {
            gauge!(
                "job_queue_depth",
                "queue" => self.queue.clone(),
                "state" => state
            )
            .set(value as f64);
        }
    }
}

/// Count enqueues from the producer side.
pub fn job_enqueued(queue: &str) {
    counter!("job_queue_jobs_enqueued_total", "queue" => queue.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = QueueMetrics::new("mail", "mail_delivery");
        assert_eq!(metrics.queue, "mail");
        assert_eq!(metrics.handler, "mail_delivery");
    }

    #[test]
    fn test_recording_helpers_do_not_panic() {
        let metrics = QueueMetrics::new("mail", "mail_delivery");
        metrics.job_completed(Duration::from_millis(5));
        metrics.queue_depth(&QueueCounts::default());
        job_enqueued("mail");
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics().unwrap();
        init_metrics().unwrap();
        assert!(render_metrics().is_some());
    }
}
