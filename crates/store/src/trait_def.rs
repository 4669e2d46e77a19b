//! The `DeploymentStore` seam: one production (Redis) implementation and
//! one in-memory implementation used by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::DeploymentRecord;

/// Per-PR deployment record persistence with the deployment state machine
/// enforced at every write.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Fetch the current record, if any.
    async fn get(&self, pr_number: u64) -> Result<Option<DeploymentRecord>, StoreError>;

    /// List every record currently stored (used by `/deployments`).
    async fn list(&self) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// Create a new `queued` record, or requeue an existing `failed` one,
    /// refreshing metadata from the latest webhook payload. Rejects with
    /// [`StoreError::Conflict`] if an existing record is in any other
    /// non-terminal status (a build already in flight is not restarted by
    /// a duplicate event; the dispatcher treats this as `state-conflict`).
    async fn upsert_for_webhook(&self, incoming: DeploymentRecord) -> Result<DeploymentRecord, StoreError>;

    /// `queued -> building`.
    async fn start_building(&self, pr_number: u64) -> Result<DeploymentRecord, StoreError>;

    /// `building -> running`, populating the container/port/image fields a
    /// running record requires.
    async fn mark_running(
        &self,
        pr_number: u64,
        container_id: String,
        host_port: u16,
        image_ref: String,
        tunnel_url: Option<String>,
    ) -> Result<DeploymentRecord, StoreError>;

    /// `building -> failed` or `destroying -> failed`.
    async fn mark_failed(&self, pr_number: u64, error_kind: String) -> Result<DeploymentRecord, StoreError>;

    /// Any non-terminal status `-> destroying`.
    async fn start_destroying(&self, pr_number: u64) -> Result<DeploymentRecord, StoreError>;

    /// Delete the record (the only way a record disappears).
    async fn delete(&self, pr_number: u64) -> Result<(), StoreError>;

    /// Records in a non-terminal state older than `max_age_secs`, for the
    /// sweeper.
    async fn sweep_candidates(
        &self,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeploymentRecord>, StoreError>;

    /// Host ports currently in use by `running` records, checked by the
    /// port allocator before binding.
    async fn ports_in_use(&self) -> Result<Vec<u16>, StoreError>;
}
