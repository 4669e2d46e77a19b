//! Store error kinds.

/// Errors from deployment-record persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the given PR.
    #[error("no deployment record for pr {0}")]
    NotFound(u64),
    /// The requested transition is not legal from the record's current
    /// status, or a concurrent writer won the race.
    #[error("state-conflict: {0}")]
    Conflict(String),
    /// The record would violate an invariant after the write.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Underlying Redis I/O or serialization error.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Backend(e.to_string())
    }
}
