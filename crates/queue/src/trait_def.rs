//! The `JobQueue` seam: one Redis-backed production implementation and one
//! in-memory implementation used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::model::{Job, JobKind, Priority};

/// Durable job queue operations.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job, ready to run at `ready_at` (immediately unless a
    /// prior failure scheduled backoff).
    async fn enqueue(&self, kind: JobKind, priority: Priority, max_attempts: u32) -> Result<Job, QueueError>;

    /// Atomically claim the next ready job across priority lanes
    /// (high, then normal, then low), marking it `active`. Returns `None`
    /// if nothing is ready.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Publish a progress heartbeat (0-100) for an active job.
    async fn heartbeat(&self, job_id: Uuid, progress: u8) -> Result<(), QueueError>;

    /// Record terminal success; the job moves to `completed`.
    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Record a failure. If attempts remain and `error_kind` is retryable,
    /// reschedule with exponential backoff; otherwise move to dead-letter.
    async fn fail(&self, job_id: Uuid, error_kind: String, non_retryable: bool) -> Result<(), QueueError>;

    /// Fetch a job's current state by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError>;

    /// Re-deliver any `active` jobs whose heartbeat has gone stale.
    async fn recover_stalled(&self, stall_after_secs: u64, now: DateTime<Utc>) -> Result<Vec<Job>, QueueError>;

    /// Counts per queue state, for `/admin/queue/stats`.
    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Aggregate counts across the queue's lanes and terminal lists.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_letter: usize,
}
