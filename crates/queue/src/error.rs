//! Queue error kinds.

use uuid::Uuid;

/// Errors from job enqueue/dequeue/bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No job exists with the given id.
    #[error("no job {0}")]
    NotFound(Uuid),
    /// Underlying Redis I/O or serialization error.
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
