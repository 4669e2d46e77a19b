//! Production `JobQueue`, backed by Redis.
//!
//! Layout (queue entries live under the queue's own prefix; no schema is
//! exposed externally):
//!
//! - `previewctl:queue:jobs` — hash, `id -> Job` JSON. The single source of
//!   truth for a job's fields; everything else below is an index into it.
//! - `previewctl:queue:pending:<lane>` — sorted set per priority lane,
//!   score = `ready_at` unix seconds, member = job id. A job becomes
//!   claimable once its score is `<= now`.
//! - `previewctl:queue:active` — set of currently claimed job ids.
//! - `previewctl:queue:completed` / `previewctl:queue:dead_letter` — capped
//!   lists, newest first, for `/admin/queue/stats` and operator inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::QueueError;
use crate::model::{Job, JobKind, JobStatus, Priority};
use crate::trait_def::{JobQueue, QueueStats};

const JOBS_KEY: &str = "previewctl:queue:jobs";
const ACTIVE_KEY: &str = "previewctl:queue:active";
const COMPLETED_KEY: &str = "previewctl:queue:completed";
const DEAD_LETTER_KEY: &str = "previewctl:queue:dead_letter";
const LANES: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

fn lane_key(priority: Priority) -> String {
    format!("previewctl:queue:pending:{}", priority.lane())
}

/// Redis-backed job queue. Cheap to clone (`ConnectionManager` is an `Arc`
/// handle).
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    backoff_initial_secs: u64,
    backoff_multiplier: f64,
    backoff_cap_secs: u64,
    retained_completed: usize,
    retained_failed: usize,
}

impl RedisQueue {
    /// Connect to `redis_url` and return a ready-to-use queue.
    pub async fn connect(
        redis_url: &str,
        backoff_initial_secs: u64,
        backoff_multiplier: f64,
        backoff_cap_secs: u64,
        retained_completed: usize,
        retained_failed: usize,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            backoff_initial_secs,
            backoff_multiplier,
            backoff_cap_secs,
            retained_completed,
            retained_failed,
        })
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(JOBS_KEY, job_id.to_string()).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_job(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;
        let _: () = conn.hset(JOBS_KEY, job.id.to_string(), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, kind: JobKind, priority: Priority, max_attempts: u32) -> Result<Job, QueueError> {
        let job = Job::new(kind, priority, max_attempts);
        self.save_job(&job).await?;

        let mut conn = self.conn.clone();
        let score = job.ready_at.timestamp();
        let _: () = conn.zadd(lane_key(priority), job.id.to_string(), score).await?;
        Ok(job)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();

        for priority in LANES {
            let key = lane_key(priority);
            let ready: Vec<String> = conn.zrangebyscore_limit(&key, 0, now, 0, 1).await?;
            let Some(id_str) = ready.into_iter().next() else { continue };

            // Claim by removal: if two workers race on the same lane, only
            // one `ZREM` returns 1.
            let removed: i64 = conn.zrem(&key, &id_str).await?;
            if removed == 0 {
                continue;
            }

            let Ok(job_id) = Uuid::parse_str(&id_str) else { continue };
            let Some(mut job) = self.load_job(job_id).await? else { continue };

            job.status = JobStatus::Active;
            job.attempts += 1;
            job.last_heartbeat_at = Some(Utc::now());
            self.save_job(&job).await?;
            let _: () = conn.sadd(ACTIVE_KEY, id_str).await?;

            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn heartbeat(&self, job_id: Uuid, progress: u8) -> Result<(), QueueError> {
        let mut job = self.load_job(job_id).await?.ok_or(QueueError::NotFound(job_id))?;
        job.progress = progress.min(100);
        job.last_heartbeat_at = Some(Utc::now());
        self.save_job(&job).await
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut job = self.load_job(job_id).await?.ok_or(QueueError::NotFound(job_id))?;
        job.status = JobStatus::Completed;
        job.progress = 100;
        self.save_job(&job).await?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(ACTIVE_KEY, job_id.to_string())
            .lpush(COMPLETED_KEY, job_id.to_string())
            .ltrim(COMPLETED_KEY, 0, self.retained_completed as isize - 1);
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error_kind: String, non_retryable: bool) -> Result<(), QueueError> {
        let mut job = self.load_job(job_id).await?.ok_or(QueueError::NotFound(job_id))?;
        job.last_error = Some(error_kind);

        let mut conn = self.conn.clone();

        if non_retryable || job.attempts_exhausted() {
            job.status = JobStatus::DeadLetter;
            self.save_job(&job).await?;

            let mut pipe = redis::pipe();
            pipe.atomic()
                .srem(ACTIVE_KEY, job_id.to_string())
                .lpush(DEAD_LETTER_KEY, job_id.to_string())
                .ltrim(DEAD_LETTER_KEY, 0, self.retained_failed as isize - 1);
            let _: () = pipe.query_async(&mut conn).await?;
        } else {
            let delay =
                job.backoff_delay_secs(self.backoff_initial_secs, self.backoff_multiplier, self.backoff_cap_secs);
            job.status = JobStatus::Pending;
            job.ready_at = Utc::now() + chrono::Duration::seconds(delay as i64);
            self.save_job(&job).await?;

            let mut pipe = redis::pipe();
            pipe.atomic()
                .srem(ACTIVE_KEY, job_id.to_string())
                .zadd(lane_key(job.priority), job_id.to_string(), job.ready_at.timestamp());
            let _: () = pipe.query_async(&mut conn).await?;
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        self.load_job(job_id).await
    }

    async fn recover_stalled(&self, stall_after_secs: u64, now: DateTime<Utc>) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let active_ids: Vec<String> = conn.smembers(ACTIVE_KEY).await?;

        let mut recovered = Vec::new();
        for id_str in active_ids {
            let Ok(job_id) = Uuid::parse_str(&id_str) else { continue };
            let Some(mut job) = self.load_job(job_id).await? else { continue };
            if !job.is_stalled(stall_after_secs, now) {
                continue;
            }

            job.status = JobStatus::Pending;
            job.ready_at = now;
            self.save_job(&job).await?;

            let mut pipe = redis::pipe();
            pipe.atomic()
                .srem(ACTIVE_KEY, &id_str)
                .zadd(lane_key(job.priority), &id_str, now.timestamp());
            let _: () = pipe.query_async(&mut conn).await?;

            recovered.push(job);
        }
        Ok(recovered)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();

        let mut pending = 0usize;
        for priority in LANES {
            pending += conn.zcard::<_, usize>(lane_key(priority)).await?;
        }

        Ok(QueueStats {
            pending,
            active: conn.scard(ACTIVE_KEY).await?,
            completed: conn.llen(COMPLETED_KEY).await?,
            failed: 0,
            dead_letter: conn.llen(DEAD_LETTER_KEY).await?,
        })
    }
}
