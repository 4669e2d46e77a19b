//! Production `DeploymentStore`, backed by Redis.
//!
//! Each record lives as a JSON blob under `previewctl:deployments:<pr>`,
//! with an `EXPIRE` re-armed on every successful write so an abandoned
//! record (engine crash, missed webhook) ages out after the configured
//! TTL instead of accumulating forever.
//!
//! Transitions are read-modify-write under an optimistic `WATCH`/`MULTI`
//! loop so two workers racing to finish the same PR (e.g. a stale build
//! finishing after a `closed` webhook already started destroying it)
//! never clobber each other's write — the loser sees its `WATCH` fail and
//! retries against the fresh value. `WATCH`/`MULTI`/`EXEC` only hold
//! together as a transaction on a single, unshared connection: a
//! multiplexed `ConnectionManager` interleaves other callers' commands
//! between our `WATCH` and `EXEC` on the same socket, which would let a
//! pending `WATCH` be invalidated (or silently not be) by traffic that
//! has nothing to do with this transaction. Every CAS span below opens a
//! dedicated connection from the `Client` instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::model::{DeploymentRecord, DeploymentStatus};
use crate::state_machine::is_legal_transition;
use crate::trait_def::DeploymentStore;

const KEY_PREFIX: &str = "previewctl:deployments:";
const INDEX_KEY: &str = "previewctl:deployments:index";
const MAX_CAS_RETRIES: u32 = 8;

fn record_key(pr_number: u64) -> String {
    format!("{KEY_PREFIX}{pr_number}")
}

/// Redis-backed store. Cheap to clone: `ConnectionManager` and `Client`
/// are themselves `Arc`-wrapped handles.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    client: redis::Client,
    deployment_ttl_secs: i64,
}

impl RedisStore {
    /// Connect to `redis_url` and return a ready-to-use store. Every
    /// record write re-arms its key's TTL to `deployment_ttl_secs`.
    pub async fn connect(redis_url: &str, deployment_ttl_secs: i64) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, client, deployment_ttl_secs })
    }

    async fn read_record(&self, pr_number: u64) -> Result<Option<DeploymentRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(record_key(pr_number)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// A dedicated, non-multiplexed connection for a `WATCH`-guarded
    /// transaction span.
    async fn transaction_connection(&self) -> Result<redis::aio::Connection, StoreError> {
        Ok(self.client.get_async_connection().await?)
    }

    /// Optimistic read-modify-write: `WATCH` the key, apply `mutate`, retry
    /// on concurrent modification up to [`MAX_CAS_RETRIES`] times.
    async fn compare_and_swap<F>(&self, pr_number: u64, mut mutate: F) -> Result<DeploymentRecord, StoreError>
    where
        F: FnMut(&mut DeploymentRecord) -> Result<(), StoreError>,
    {
        let key = record_key(pr_number);
        let mut conn = self.transaction_connection().await?;

        for _ in 0..MAX_CAS_RETRIES {
            let () = redis::cmd("WATCH").arg(&key).query_async(&mut conn).await?;

            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else {
                let () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                return Err(StoreError::NotFound(pr_number));
            };
            let mut record: DeploymentRecord = serde_json::from_str(&raw)?;

            if let Err(e) = mutate(&mut record) {
                let () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                return Err(e);
            }
            record.updated_at = Utc::now();

            let payload = serde_json::to_string(&record)?;
            let mut pipe = redis::pipe();
            pipe.atomic().set(&key, &payload).expire(&key, self.deployment_ttl_secs);

            let result: Option<()> = pipe.query_async(&mut conn).await?;
            if result.is_some() {
                return Ok(record);
            }
            // `EXEC` returned nil: another writer's transaction beat us
            // since our `WATCH`. Retry against the fresh value.
        }

        Err(StoreError::Conflict(format!(
            "exhausted {MAX_CAS_RETRIES} CAS retries for pr {pr_number}"
        )))
    }

    async fn transition(
        &self,
        pr_number: u64,
        target: DeploymentStatus,
        mutate: impl Fn(&mut DeploymentRecord) + Send + Sync,
    ) -> Result<DeploymentRecord, StoreError> {
        let record = self
            .compare_and_swap(pr_number, |record| {
                if !is_legal_transition(record.status, target) {
                    return Err(StoreError::Conflict(format!(
                        "cannot move pr {pr_number} from {:?} to {target:?}",
                        record.status
                    )));
                }
                mutate(record);
                record.status = target;
                if !record.satisfies_running_invariant() {
                    return Err(StoreError::InvariantViolation(format!(
                        "pr {pr_number} marked running without container_id/host_port"
                    )));
                }
                Ok(())
            })
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl DeploymentStore for RedisStore {
    async fn get(&self, pr_number: u64) -> Result<Option<DeploymentRecord>, StoreError> {
        self.read_record(pr_number).await
    }

    async fn list(&self) -> Result<Vec<DeploymentRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let prs: Vec<u64> = conn.smembers(INDEX_KEY).await?;
        let mut records = Vec::with_capacity(prs.len());
        for pr in prs {
            if let Some(record) = self.read_record(pr).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn upsert_for_webhook(&self, incoming: DeploymentRecord) -> Result<DeploymentRecord, StoreError> {
        let key = record_key(incoming.pr_number);
        let mut conn = self.transaction_connection().await?;

        for _ in 0..MAX_CAS_RETRIES {
            let () = redis::cmd("WATCH").arg(&key).query_async(&mut conn).await?;
            let existing: Option<String> = conn.get(&key).await?;

            let record = match existing {
                None => incoming.clone(),
                Some(raw) => {
                    let existing: DeploymentRecord = serde_json::from_str(&raw)?;
                    if existing.status != DeploymentStatus::Failed {
                        let () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                        return Err(StoreError::Conflict(format!(
                            "pr {} already has an in-flight deployment ({:?})",
                            incoming.pr_number, existing.status
                        )));
                    }
                    let mut refreshed = incoming.clone();
                    refreshed.status = DeploymentStatus::Queued;
                    refreshed.created_at = existing.created_at;
                    refreshed.updated_at = Utc::now();
                    refreshed
                }
            };

            let payload = serde_json::to_string(&record)?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .set(&key, &payload)
                .expire(&key, self.deployment_ttl_secs)
                .sadd(INDEX_KEY, record.pr_number);

            let result: Option<()> = pipe.query_async(&mut conn).await?;
            if result.is_some() {
                return Ok(record);
            }
            // `EXEC` returned nil: another writer's transaction beat us
            // since our `WATCH`. Retry against the fresh value.
        }

        Err(StoreError::Conflict(format!(
            "exhausted {MAX_CAS_RETRIES} CAS retries for pr {}",
            incoming.pr_number
        )))
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
            r.container_id = Some(container_id.clone());
            r.host_port = Some(host_port);
            r.image_ref = Some(image_ref.clone());
            r.tunnel_url = tunnel_url.clone();
            r.build_completed_at = Some(Utc::now());
            r.last_error = None;
        })
        .await
    }

    async fn mark_failed(&self, pr_number: u64, error_kind: String) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Failed, |r| {
            r.last_error = Some(error_kind.clone());
            r.build_completed_at = Some(Utc::now());
        })
        .await
    }

    async fn start_destroying(&self, pr_number: u64) -> Result<DeploymentRecord, StoreError> {
        self.transition(pr_number, DeploymentStatus::Destroying, |_| {}).await
    }

    async fn delete(&self, pr_number: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(record_key(pr_number))
            .srem(INDEX_KEY, pr_number);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn sweep_candidates(
        &self,
        max_age_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeploymentRecord>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status != DeploymentStatus::Destroying)
            .filter(|r| r.older_than(max_age_secs, now))
            .collect())
    }

    async fn ports_in_use(&self) -> Result<Vec<u16>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.status == DeploymentStatus::Running)
            .filter_map(|r| r.host_port)
            .collect())
    }
}
