//! `DeploymentRecord` and its status enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deployment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Build job enqueued, not yet started.
    Queued,
    /// Build executor is running.
    Building,
    /// Container is up and the record is fully populated.
    Running,
    /// Destroy job is in flight.
    Destroying,
    /// Build or destroy failed; non-terminal (can return to `Queued`).
    Failed,
    /// Terminal stop state reserved for explicit operator action; the
    /// controller itself only ever deletes records on successful destroy.
    Stopped,
}

/// Per-PR deployment bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Primary key.
    pub pr_number: u64,
    /// Current lifecycle state.
    pub status: DeploymentStatus,
    /// Container id, once running.
    #[serde(default)]
    pub container_id: Option<String>,
    /// Host port bound to the container, once running.
    #[serde(default)]
    pub host_port: Option<u16>,
    /// Built image reference.
    #[serde(default)]
    pub image_ref: Option<String>,
    /// Source branch.
    pub branch: String,
    /// Commit SHA at enqueue time.
    pub commit_sha: String,
    /// PR title.
    pub title: String,
    /// PR author login.
    pub author: String,
    /// `owner/name`.
    pub repo_full_name: String,
    /// Clone URL.
    pub clone_url: String,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// When the build started.
    #[serde(default)]
    pub build_started_at: Option<DateTime<Utc>>,
    /// When the build completed (success or failure).
    #[serde(default)]
    pub build_completed_at: Option<DateTime<Utc>>,
    /// Classified error kind from the last failure, if any.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Public tunnel URL, once the tunnel is up.
    #[serde(default)]
    pub tunnel_url: Option<String>,
}

impl DeploymentRecord {
    /// Construct a fresh `queued` record from webhook-derived metadata.
    #[must_use]
    pub fn new_queued(
        pr_number: u64,
        branch: String,
        commit_sha: String,
        title: String,
        author: String,
        repo_full_name: String,
        clone_url: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            pr_number,
            status: DeploymentStatus::Queued,
            container_id: None,
            host_port: None,
            image_ref: None,
            branch,
            commit_sha,
            title,
            author,
            repo_full_name,
            clone_url,
            created_at: now,
            updated_at: now,
            build_started_at: None,
            build_completed_at: None,
            last_error: None,
            tunnel_url: None,
        }
    }

    /// `running` implies `container_id` and `host_port` are populated.
    #[must_use]
    pub fn satisfies_running_invariant(&self) -> bool {
        if self.status != DeploymentStatus::Running {
            return true;
        }
        self.container_id.is_some() && self.host_port.is_some()
    }

    /// Whether this record is older than `max_age_secs` (for the sweeper).
    #[must_use]
    pub fn older_than(&self, max_age_secs: i64, now: DateTime<Utc>) -> bool {
        (now - self.created_at).num_seconds() >= max_age_secs
    }
}
