//! Queue error types

use crate::job::JobState;
use thiserror::Error;
use uuid::Uuid;

/// Job queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Backing store unreachable or rejected a command
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    /// No job with this id exists (never enqueued, or pruned by retention)
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// The requested transition is not allowed from the job's current state
    #[error("Job {id} cannot transition from state '{state}'")]
    InvalidTransition { id: Uuid, state: JobState },

    /// Payload or job record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A job handler reported a failure
    #[error("Processing error: {0}")]
    Processing(String),

    /// A job handler did not finish within the dispatch timeout
    #[error("Dispatch timed out after {0}ms")]
    Timeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Create a processing error from any displayable cause
    pub fn processing(message: impl Into<String>) -> Self {
        QueueError::Processing(message.into())
    }

    /// Whether the caller may retry the same operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_) | QueueError::Timeout(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<core_config::ConfigError> for QueueError {
    fn from(err: core_config::ConfigError) -> Self {
        QueueError::Config(err.to_string())
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
