//! In-memory `DeploymentStore`, used by the test suite so it never needs a
//! live Redis instance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{DeploymentRecord, DeploymentStatus};
use crate::state_machine::is_legal_transition;
use crate::trait_def::DeploymentStore;

/// In-memory store backed by a single `RwLock<HashMap<..>>`. Good enough
/// for a single-process test run; the production binary always uses
/// [`crate::redis_store::RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<u64, DeploymentRecord>>,
}

impl MemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn transition(
        &self,
        pr_number: u64,
        target: DeploymentStatus,
        mutate: impl FnOnce(&mut DeploymentRecord),
    ) -> Result<DeploymentRecord, StoreError> {
        let mut guard = self.records.write().await;
        let record = guard.get_mut(&pr_number).ok_or(StoreError::NotFound(pr_number))?;

        if !is_legal_transition(record.status, target) {
            return Err(StoreError::Conflict(format!(
                "cannot move pr {pr_number} from {:?} to {:?}",
                record.status, target
            )));
        }

        mutate(record);
        record.status = target;
        record.updated_at = Utc::now();

        if !record.satisfies_running_invariant() {
            return Err(StoreError::InvariantViolation(format!(
                "pr {pr_number} marked running without container_id/host_port"
            )));
        }

        Ok(record.clone())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn get(&self, pr_number: u64) -> Result<Option<DeploymentRecord>, StoreError> {
        Ok(self.records.read().await.get(&pr_number).cloned())
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn upsert_for_webhook(&self, incoming: DeploymentRecord) -> Result<DeploymentRecord, StoreError> {
        let mut guard = self.records.write().await;
        match guard.get(&incoming.pr_number) {
            None => {
                guard.insert(incoming.pr_number, incoming.clone());
                Ok(incoming)
            }
            Some(existing) if existing.status == DeploymentStatus::Failed => {
                let mut refreshed = incoming;
                refreshed.status = DeploymentStatus::Queued;
                refreshed.created_at = existing.created_at;
                refreshed.updated_at = Utc::now();
                guard.insert(refreshed.pr_number, refreshed.clone());
                Ok(refreshed)
            }
            Some(existing) => Err(StoreError::Conflict(format!(
                "pr {} already has an in-flight deployment ({:?})",
                incoming.pr_number, existing.status
            ))),
        }
    }

    async fn start_building(&self, pr_number: u64) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Building, |r| {
            r.build_started_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_running(
        &self,
        pr_number: u64,
        container_id: String,
        host_port: u16,
        image_ref: String,
        tunnel_url: Option<String>,
    ) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Running, |r| {
            r.container_id = Some(container_id);
            r.host_port = Some(host_port);
            r.image_ref = Some(image_ref);
            r.tunnel_url = tunnel_url;
            r.build_completed_at = Some(Utc::now());
            r.last_error = None;
        })
        .await
    }

    async fn mark_failed(&self, pr_number: u64, error_kind: String) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Failed, |r| {
            r.last_error = Some(error_kind);
            r.build_completed_at = Some(Utc::now());
        })
        .await
    }

    async fn start_destroying(&self, pr_number: u64) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Destroying, |_| {}).await
    }

    async fn delete(&self, pr_number: u64) -> Result<(), StoreError> {
        self.records.write().await.remove(&pr_number);
        Ok(())
    }

    async fn sweep_candidates(
        &self,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status != DeploymentStatus::Destroying)
            .filter(|r| r.older_than(max_age_secs, now))
            .cloned()
            .collect())
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == DeploymentStatus::Running)
            .filter_map(|r| r.host_port)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pr: u64) -> DeploymentRecord {
        DeploymentRecord::new_queued(
            pr,
            "feat/x".into(),
            "abc123".into(),
            "Add feature".into(),
            "octocat".into(),
            "u/r".into(),
            "https://forge.test/u/r.git".into(),
        )
    }

    #[tokio::test]
    async fn full_happy_path_lifecycle() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(42)).await.unwrap();

        store.start_building(42).await.unwrap();
        let running = store
            .mark_running(42, "abc123def456".into(), 5010, "preview-pr-42:1".into(), Some("https://x.test".into()))
            .await
            .unwrap();
        assert_eq!(running.status, DeploymentStatus::Running);
        assert_eq!(running.host_port, Some(5010));

        store.start_destroying(42).await.unwrap();
        store.delete(42).await.unwrap();

        assert!(store.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_opened_during_building_is_a_conflict() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(42)).await.unwrap();
        store.start_building(42).await.unwrap();

        let result = store.upsert_for_webhook(sample(42)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn failed_record_is_requeued_by_a_new_event() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(42)).await.unwrap();
        store.start_building(42).await.unwrap();
        store.mark_failed(42, "build-failed".into()).await.unwrap();

        let requeued = store.upsert_for_webhook(sample(42)).await.unwrap();
        assert_eq!(requeued.status, DeploymentStatus::Queued);
    }

    #[tokio::test]
    async fn running_without_container_id_violates_invariant() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(42)).await.unwrap();
        store.start_building(42).await.unwrap();

        let result = store
            .transition(42, DeploymentStatus::Running, |_| {})
            .await;
        assert!(matches!(result, Err(StoreError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn destroy_on_unknown_pr_is_not_found() {
        let store = MemoryStore::new();
        let result = store.start_destroying(999).await;
        assert!(matches!(result, Err(StoreError::NotFound(999))));
    }

    #[tokio::test]
    async fn sweeper_only_selects_old_non_destroying_records() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(1)).await.unwrap();

        let now = Utc::now() + chrono::Duration::hours(25);
        let candidates = store.sweep_candidates(24 * 3600, now).await.unwrap();
        assert_eq!(candidates.len(), 1);

        let too_soon = store.sweep_candidates(24 * 3600, Utc::now()).await.unwrap();
        assert!(too_soon.is_empty());
    }

    #[tokio::test]
    async fn ports_in_use_only_counts_running_records() {
        let store = MemoryStore::new();
        store.upsert_for_webhook(sample(1)).await.unwrap();
        store.start_building(1).await.unwrap();
        store
            .mark_running(1, "c1".into(), 5050, "img:1".into(), None)
            .await
            .unwrap();

        store.upsert_for_webhook(sample(2)).await.unwrap();

        let ports = store.ports_in_use().await.unwrap();
        assert_eq!(ports, vec![5050]);
    }
}
