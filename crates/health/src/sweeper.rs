//! Stale-deployment sweeper.
//!
//! Runs on a fixed interval: any non-terminal record older than the
//! staleness threshold is transitioned to `destroying` and a destroy job is
//! enqueued, exactly as if a `closed` webhook had arrived for it.

use std::sync::Arc;

use chrono::Utc;
use previewctl_queue::{DestroyJobPayload, JobKind, JobQueue, Priority};
use previewctl_store::DeploymentStore;
use tracing::{error, info, warn};

/// Sweeps `DeploymentStore` for stale records and requeues their teardown.
pub struct Sweeper {
    store: Arc<dyn DeploymentStore>,
    queue: Arc<dyn JobQueue>,
    stale_after_secs: i64,
    max_job_attempts: u32,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        queue: Arc<dyn JobQueue>,
        stale_after_secs: i64,
        max_job_attempts: u32,
    ) -> Self {
        Self { store, queue, stale_after_secs, max_job_attempts }
    }

    /// Run a single sweep pass. Returns the number of records requeued for
    /// destruction. Each candidate is handled independently; one failure
    /// does not abort the rest of the pass.
    pub async fn sweep_once(&self) -> usize {
        let candidates = match self.store.sweep_candidates(self.stale_after_secs, Utc::now()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "sweeper: failed to list candidates");
                return 0;
            }
        };

        let mut requeued = 0;
        for record in candidates {
            if let Err(e) = self.store.start_destroying(record.pr_number).await {
                warn!(pr_number = record.pr_number, error = %e, "sweeper: failed to mark destroying");
                continue;
            }

            let payload = DestroyJobPayload { pr_number: record.pr_number, container_id: record.container_id.clone() };
            match self.queue.enqueue(JobKind::DestroyContainer(payload), Priority::Low, self.max_job_attempts).await {
                Ok(job) => {
                    info!(pr_number = record.pr_number, job_id = %job.id, "sweeper: requeued stale deployment for teardown");
                    requeued += 1;
                }
                Err(e) => {
                    error!(pr_number = record.pr_number, error = %e, "sweeper: failed to enqueue destroy job");
                }
            }
        }

        requeued
    }

    /// Run `sweep_once` on a fixed interval until the returned future is
    /// dropped (the caller typically holds this in a `tokio::spawn`ed task
    /// cancelled at shutdown).
    pub async fn run(self, interval_secs: u64) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let requeued = self.sweep_once().await;
            if requeued > 0 {
                info!(requeued, "sweeper: pass complete");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use previewctl_queue::MemoryQueue;
    use previewctl_store::{DeploymentStatus, MemoryStore};

    #[tokio::test]
    async fn sweeps_only_stale_non_terminal_records() {
        let store: Arc<dyn DeploymentStore> = Arc::new(MemoryStore::default());
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::default());

        let mut stale = previewctl_store::DeploymentRecord::new_queued(
            1,
            "main".into(),
            "deadbeef".into(),
            "t".into(),
            "a".into(),
            "o/r".into(),
            "url".into(),
        );
        stale.created_at = Utc::now() - chrono::Duration::hours(48);
        stale.updated_at = stale.created_at;
        store.upsert_for_webhook(stale).await.unwrap();

        let fresh = previewctl_store::DeploymentRecord::new_queued(
            2,
            "main".into(),
            "cafe".into(),
            "t".into(),
            "a".into(),
            "o/r".into(),
            "url".into(),
        );
        store.upsert_for_webhook(fresh).await.unwrap();

        let sweeper = Sweeper::new(store.clone(), queue.clone(), 24 * 3600, 3);
        let requeued = sweeper.sweep_once().await;
        assert_eq!(requeued, 1);

        let pr1 = store.get(1).await.unwrap().unwrap();
        assert_eq!(pr1.status, DeploymentStatus::Destroying);

        let pr2 = store.get(2).await.unwrap().unwrap();
        assert_eq!(pr2.status, DeploymentStatus::Queued);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn no_candidates_is_a_no_op() {
        let store: Arc<dyn DeploymentStore> = Arc::new(MemoryStore::default());
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::default());
        let sweeper = Sweeper::new(store, queue, 24 * 3600, 3);
        assert_eq!(sweeper.sweep_once().await, 0);
    }
}
