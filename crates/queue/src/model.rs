//! Job kinds and the envelope that travels through the queue.

use chrono::{DateTime, Utc};
use previewctl_crypto::EncryptedField;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority lane. Higher-priority lanes are drained first within a single
/// worker's poll, matching the "isolated job namespaces by priority"
/// guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    #[must_use]
    pub fn lane(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Sensitive fields a build job carries, encrypted at rest in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJobPayload {
    pub pr_number: u64,
    pub branch: String,
    pub clone_url: EncryptedField,
    pub repo_full_name: String,
    pub author: String,
    pub installation_id: Option<String>,
}

/// Payload for a destroy job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyJobPayload {
    pub pr_number: u64,
    pub container_id: Option<String>,
}

/// `cleanup-stale`: zero-payload housekeeping job the sweeper enqueues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStalePayload;

/// Discriminated job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobKind {
    BuildContainer(BuildJobPayload),
    DestroyContainer(DestroyJobPayload),
    CleanupStale(CleanupStalePayload),
}

impl JobKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildContainer(_) => "build-container",
            Self::DestroyContainer(_) => "destroy-container",
            Self::CleanupStale(_) => "cleanup-stale",
        }
    }

    #[must_use]
    pub fn pr_number(&self) -> Option<u64> {
        match self {
            Self::BuildContainer(p) => Some(p.pr_number),
            Self::DestroyContainer(p) => Some(p.pr_number),
            Self::CleanupStale(_) => None,
        }
    }
}

/// A job's lifecycle status within the queue (distinct from the deployment
/// record's own state machine in `previewctl_store`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
    DeadLetter,
}

/// A queued unit of work plus its scheduling and retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ready_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Construct a new pending job, ready to run immediately.
    #[must_use]
    pub fn new(kind: JobKind, priority: Priority, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            progress: 0,
            last_error: None,
            created_at: now,
            ready_at: now,
            last_heartbeat_at: None,
        }
    }

    /// Whether retryable failures on this job are exhausted.
    #[must_use]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Backoff delay before the next retry: `initial * multiplier^attempt`,
    /// capped.
    #[must_use]
    pub fn backoff_delay_secs(&self, initial_secs: u64, multiplier: f64, cap_secs: u64) -> u64 {
        let exp = multiplier.powi(self.attempts.saturating_sub(1) as i32);
        let delay = (initial_secs as f64 * exp) as u64;
        delay.min(cap_secs)
    }

    /// Whether this job has gone stale: no heartbeat within `stall_after_secs`
    /// of it becoming active.
    #[must_use]
    pub fn is_stalled(&self, stall_after_secs: u64, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Active {
            return false;
        }
        let last = self.last_heartbeat_at.unwrap_or(self.created_at);
        (now - last).num_seconds() as u64 >= stall_after_secs
    }
}

/// Non-retryable error kinds: these bypass the retry loop and go straight
/// to `failed`/dead-letter without consuming another attempt cycle through
/// backoff.
#[must_use]
pub fn is_non_retryable(error_kind: &str) -> bool {
    matches!(error_kind, "invalid-container-id" | "decrypt-error" | "signature-invalid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut job = Job::new(JobKind::CleanupStale(CleanupStalePayload), Priority::Normal, 3);
        job.attempts = 1;
        assert_eq!(job.backoff_delay_secs(2, 2.0, 60), 2);
        job.attempts = 2;
        assert_eq!(job.backoff_delay_secs(2, 2.0, 60), 4);
        job.attempts = 3;
        assert_eq!(job.backoff_delay_secs(2, 2.0, 60), 8);
        job.attempts = 10;
        assert_eq!(job.backoff_delay_secs(2, 2.0, 60), 60);
    }

    #[test]
    fn exhaustion_after_max_attempts() {
        let mut job = Job::new(JobKind::CleanupStale(CleanupStalePayload), Priority::Normal, 3);
        assert!(!job.attempts_exhausted());
        job.attempts = 3;
        assert!(job.attempts_exhausted());
    }

    #[test]
    fn non_retryable_kinds_are_recognized() {
        assert!(is_non_retryable("decrypt-error"));
        assert!(is_non_retryable("invalid-container-id"));
        assert!(!is_non_retryable("build-failed"));
    }

    #[test]
    fn stall_detection_requires_active_status() {
        let mut job = Job::new(JobKind::CleanupStale(CleanupStalePayload), Priority::Normal, 3);
        let now = job.created_at + chrono::Duration::seconds(200);
        assert!(!job.is_stalled(120, now));
        job.status = JobStatus::Active;
        assert!(job.is_stalled(120, now));
    }
}
