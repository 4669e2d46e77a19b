//! In-memory `JobQueue`, used by the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::QueueError;
use crate::model::{Job, JobKind, JobStatus, Priority};
use crate::trait_def::{JobQueue, QueueStats};

const RETAINED_TERMINAL: usize = 100;

/// In-memory store backed by a single `Mutex<HashMap<..>>`, ordered by
/// priority then `ready_at` on every dequeue.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<HashMap<Uuid, Job>>,
    backoff_initial_secs: u64,
    backoff_multiplier: f64,
    backoff_cap_secs: u64,
}

impl MemoryQueue {
    /// Construct an empty queue with the given backoff schedule.
    #[must_use]
    pub fn new(backoff_initial_secs: u64, backoff_multiplier: f64, backoff_cap_secs: u64) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            backoff_initial_secs,
            backoff_multiplier,
            backoff_cap_secs,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, kind: JobKind, priority: Priority, max_attempts: u32) -> Result<Job, QueueError> {
        let job = Job::new(kind, priority, max_attempts);
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();

        let candidate = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.ready_at <= now)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.ready_at.cmp(&a.ready_at)))
            .map(|j| j.id);

        match candidate {
            None => Ok(None),
            Some(id) => {
                let job = jobs.get_mut(&id).expect("candidate id came from this map");
                job.status = JobStatus::Active;
                job.attempts += 1;
                job.last_heartbeat_at = Some(now);
                Ok(Some(job.clone()))
            }
        }
    }

    async fn heartbeat(&self, job_id: Uuid, progress: u8) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.progress = progress.min(100);
        job.last_heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.status = JobStatus::Completed;
        job.progress = 100;
        prune_terminal(&mut jobs);
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error_kind: String, non_retryable: bool) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        job.last_error = Some(error_kind);

        if non_retryable || job.attempts_exhausted() {
            job.status = JobStatus::DeadLetter;
        } else {
            let delay =
                job.backoff_delay_secs(self.backoff_initial_secs, self.backoff_multiplier, self.backoff_cap_secs);
            job.status = JobStatus::Pending;
            job.ready_at = Utc::now() + chrono::Duration::seconds(delay as i64);
        }
        prune_terminal(&mut jobs);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn recover_stalled(&self, stall_after_secs: u64, now: DateTime<Utc>) -> Result<Vec<Job>, QueueError> {
        let mut jobs = self.jobs.lock().await;
        let stalled_ids: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.is_stalled(stall_after_secs, now))
            .map(|j| j.id)
            .collect();

        let mut recovered = Vec::with_capacity(stalled_ids.len());
        for id in stalled_ids {
            let job = jobs.get_mut(&id).expect("id came from this map");
            job.status = JobStatus::Pending;
            job.ready_at = now;
            recovered.push(job.clone());
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.lock().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::DeadLetter => stats.dead_letter += 1,
            }
        }
        Ok(stats)
    }
}

/// Keep terminal-state history bounded, matching the retained-history
/// limits on the production queue.
fn prune_terminal(jobs: &mut HashMap<Uuid, Job>) {
    let mut terminal: Vec<Uuid> = jobs
        .values()
        .filter(|j| matches!(j.status, JobStatus::Completed | JobStatus::DeadLetter))
        .map(|j| j.id)
        .collect();

    if terminal.len() <= RETAINED_TERMINAL {
        return;
    }

    terminal.sort_by_key(|id| jobs[id].created_at);
    for id in terminal.into_iter().take_while(|_| jobs.len() > RETAINED_TERMINAL) {
        jobs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CleanupStalePayload, DestroyJobPayload};

    fn destroy(pr: u64) -> JobKind {
        JobKind::DestroyContainer(DestroyJobPayload { pr_number: pr, container_id: None })
    }

    #[tokio::test]
    async fn dequeue_prefers_higher_priority() {
        let queue = MemoryQueue::new(2, 2.0, 60);
        queue.enqueue(destroy(1), Priority::Low, 3).await.unwrap();
        queue.enqueue(destroy(2), Priority::High, 3).await.unwrap();

        let next = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(next.kind.pr_number(), Some(2));
        assert_eq!(next.status, JobStatus::Active);
        assert_eq!(next.attempts, 1);
    }

    #[tokio::test]
    async fn failed_job_reschedules_with_backoff_until_exhausted() {
        let queue = MemoryQueue::new(2, 2.0, 60);
        let job = queue.enqueue(destroy(1), Priority::Normal, 2).await.unwrap();

        queue.dequeue().await.unwrap();
        queue.fail(job.id, "destroy-partial".into(), false).await.unwrap();
        let after_first = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(after_first.status, JobStatus::Pending);

        queue.dequeue().await.unwrap();
        queue.fail(job.id, "destroy-partial".into(), false).await.unwrap();
        let after_second = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(after_second.status, JobStatus::DeadLetter);
    }

    #[tokio::test]
    async fn non_retryable_failure_skips_straight_to_dead_letter() {
        let queue = MemoryQueue::new(2, 2.0, 60);
        let job = queue.enqueue(destroy(1), Priority::Normal, 3).await.unwrap();
        queue.dequeue().await.unwrap();

        queue.fail(job.id, "decrypt-error".into(), true).await.unwrap();
        let after = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::DeadLetter);
    }

    #[tokio::test]
    async fn stalled_active_jobs_are_recovered_to_pending() {
        let queue = MemoryQueue::new(2, 2.0, 60);
        let job = queue.enqueue(destroy(1), Priority::Normal, 3).await.unwrap();
        queue.dequeue().await.unwrap();

        let future = Utc::now() + chrono::Duration::seconds(200);
        let recovered = queue.recover_stalled(120, future).await.unwrap();
        assert_eq!(recovered.len(), 1);

        let after = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn stats_reflect_counts_per_state() {
        let queue = MemoryQueue::new(2, 2.0, 60);
        queue.enqueue(destroy(1), Priority::Normal, 3).await.unwrap();
        queue.enqueue(JobKind::CleanupStale(CleanupStalePayload), Priority::Low, 3).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.active, 0);
    }
}
