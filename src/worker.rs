//! Worker pool: drains the job queue, decrypts sensitive payload fields,
//! invokes the appropriate executor, and reports progress/terminal results
//! back to the queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use previewctl_crypto::decrypt_field;
use previewctl_executor::{BuildInput, DestroyInput, ExecutorError, ProgressReporter};
use previewctl_queue::{Job, JobKind};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Bridges [`ProgressReporter`] to [`previewctl_queue::JobQueue::heartbeat`]
/// for a single in-flight job.
struct QueueProgress {
    queue: Arc<dyn previewctl_queue::JobQueue>,
    job_id: Uuid,
}

#[async_trait]
impl ProgressReporter for QueueProgress {
    async fn report(&self, percent: u8) {
        if let Err(e) = self.queue.heartbeat(self.job_id, percent).await {
            warn!(job_id = %self.job_id, error = %e, "failed to publish progress heartbeat");
        }
    }
}

/// Runs `concurrency` worker tasks, each looping `dequeue -> execute ->
/// complete/fail` until `shutdown` resolves.
pub async fn run_pool(state: AppState, concurrency: usize, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut workers = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let state = state.clone();
        let mut shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    job = state.queue.dequeue() => {
                        match job {
                            Ok(Some(job)) => run_one(&state, job, worker_id).await,
                            Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                            Err(e) => {
                                error!(worker_id, error = %e, "dequeue failed");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
            }
            info!(worker_id, "worker stopped");
        }));
    }

    shutdown.changed().await.ok();
    for worker in workers {
        let _ = worker.await;
    }
}

async fn run_one(state: &AppState, job: Job, worker_id: usize) {
    info!(worker_id, job_id = %job.id, kind = job.kind.name(), "dequeued job");

    let progress: Arc<dyn ProgressReporter> = Arc::new(QueueProgress { queue: state.queue.clone(), job_id: job.id });

    let result: Result<(), ExecutorError> = match &job.kind {
        JobKind::BuildContainer(payload) => {
            let secret = state.config.webhook_secret.as_deref().unwrap_or_default();
            let clone_url = match decrypt_field(secret, &payload.clone_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "decrypt-error on build payload");
                    record_failure(state, job.id, "decrypt-error".to_string(), true).await;
                    return;
                }
            };

            let input = BuildInput {
                pr_number: payload.pr_number,
                branch: payload.branch.clone(),
                clone_url,
                repo_full_name: payload.repo_full_name.clone(),
                author: payload.author.clone(),
                installation_id: payload.installation_id.clone(),
            };
            state.build_executor.run(input, progress.as_ref()).await.map(|_| ())
        }
        JobKind::DestroyContainer(payload) => {
            let input = DestroyInput {
                pr_number: payload.pr_number,
                container_id: payload.container_id.clone(),
                remove_image: true,
            };
            state.destroy_executor.run(input).await.map(|_| ())
        }
        JobKind::CleanupStale(_) => {
            // The sweeper (crate::worker's periodic task) issues
            // destroy-container jobs directly; a bare cleanup-stale job
            // carries no payload to act on and is acknowledged as a no-op.
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            if let Err(e) = state.queue.complete(job.id).await {
                warn!(job_id = %job.id, error = %e, "failed to mark job complete");
            }
        }
        Err(e) => {
            record_failure(state, job.id, e.kind().to_string(), e.is_non_retryable()).await;
        }
    }
}

async fn record_failure(state: &AppState, job_id: Uuid, error_kind: String, non_retryable: bool) {
    if let Err(e) = state.queue.fail(job_id, error_kind, non_retryable).await {
        error!(job_id = %job_id, error = %e, "failed to record job failure");
    }
}

/// Periodically re-delivers jobs whose heartbeat has stalled.
pub async fn run_stall_recovery(state: AppState, interval_secs: u64, stall_after_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        match state.queue.recover_stalled(stall_after_secs, chrono::Utc::now()).await {
            Ok(recovered) if !recovered.is_empty() => {
                info!(count = recovered.len(), "recovered stalled jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "stall recovery pass failed"),
        }
    }
}
