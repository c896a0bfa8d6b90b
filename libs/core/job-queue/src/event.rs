//! Structured job outcome events
//!
//! The worker emits one event per resolved lease. Sinks forward them to logs,
//! channels or any external alerting collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobEvent {
    Completed {
        queue: String,
        job_id: Uuid,
        attempt: u32,
        #[serde(with = "duration_ms")]
        latency: Duration,
    },
    Retrying {
        queue: String,
        job_id: Uuid,
        attempt: u32,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
        error: String,
        #[serde(with = "duration_ms")]
        latency: Duration,
    },
    /// Terminal failure; the hook for alerting
    Failed {
        queue: String,
        job_id: Uuid,
        attempt: u32,
        error: String,
        #[serde(with = "duration_ms")]
        latency: Duration,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Completed { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    /// 1-based attempt that produced this event
    pub fn attempt(&self) -> u32 {
        match self {
            JobEvent::Completed { attempt, .. }
            | JobEvent::Retrying { attempt, .. }
            | JobEvent::Failed { attempt, .. } => *attempt,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            JobEvent::Completed { .. } => "completed",
            JobEvent::Retrying { .. } => "retrying",
            JobEvent::Failed { .. } => "failed",
        }
    }
}

/// Receives job events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &JobEvent);
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &JobEvent) {
        match event {
            JobEvent::Completed {
                queue,
                job_id,
                attempt,
                latency,
            } => info!(
                queue = %queue,
                job_id = %job_id,
                attempt,
                latency_ms = latency.as_millis() as u64,
                outcome = "completed",
                "Job completed"
            ),
            JobEvent::Retrying {
                queue,
                job_id,
                attempt,
                max_attempts,
                retry_at,
                error,
                latency,
            } => warn!(
                queue = %queue,
                job_id = %job_id,
                attempt,
                max_attempts,
                retry_at = %retry_at,
                error = %error,
                latency_ms = latency.as_millis() as u64,
                outcome = "retrying",
                "Job failed, will retry"
            ),
            JobEvent::Failed {
                queue,
                job_id,
                attempt,
                error,
                latency,
            } => error!(
                queue = %queue,
                job_id = %job_id,
                attempt,
                error = %error,
                latency_ms = latency.as_millis() as u64,
                outcome = "failed",
                "Job failed permanently"
            ),
        }
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &JobEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_event() -> JobEvent {
        JobEvent::Failed {
            queue: "mail".to_string(),
            job_id: Uuid::nil(),
            attempt: 3,
            error: "connection refused".to_string(),
            latency: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_event_serializes_with_outcome_tag() {
        let json = serde_json::to_value(failed_event()).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["attempt"], 3);
        assert_eq!(json["latency"], 42);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut events) = ChannelEventSink::new();
        sink.emit(&failed_event());
        TracingEventSink.emit(&failed_event());

        let event = events.recv().await.unwrap();
        assert_eq!(event.outcome(), "failed");
        assert_eq!(event.attempt(), 3);

        drop(events);
        sink.emit(&failed_event());
    }
}
