//! Progress reporting seam: the build/destroy executors publish 0-100
//! progress without depending on the queue crate directly (the queue's
//! worker loop supplies the real implementation via `JobQueue::heartbeat`).

use async_trait::async_trait;

/// Receives progress updates (0-100) from an in-flight job.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, percent: u8);
}

/// A reporter that discards updates, for tests and one-off invocations.
pub struct NoopProgress;

#[async_trait]
impl ProgressReporter for NoopProgress {
    async fn report(&self, _percent: u8) {}
}
