//! Pull-request webhook payload types and event classification.

use serde::{Deserialize, Serialize};

/// Pull-request lifecycle webhook payload (simplified to the fields this
/// controller needs).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequestEvent {
    /// Raw action string from the forge (`opened`, `closed`, ...).
    pub action: String,
    /// Pull request details.
    pub pull_request: PullRequest,
    /// Repository the PR belongs to.
    pub repository: Repository,
    /// Installation id, for forges that scope webhooks to an app install.
    #[serde(default)]
    pub installation: Option<Installation>,
}

/// Pull request fields relevant to preview materialization.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequest {
    /// PR number; primary key of the deployment record.
    pub number: u64,
    /// PR title.
    pub title: String,
    /// PR author login.
    #[serde(default)]
    pub user: Option<GitHubUser>,
    /// Source branch/commit.
    pub head: GitRef,
    /// Whether the PR was merged (only meaningful when `state == "closed"`).
    #[serde(default)]
    pub merged: bool,
    /// HTML URL, used in comment bodies.
    pub html_url: String,
}

/// A branch/commit reference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitRef {
    /// Branch name.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit SHA.
    pub sha: String,
}

/// Repository fields relevant to cloning and comment posting.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Repository {
    /// `owner/name`.
    pub full_name: String,
    /// Clone URL (https).
    pub clone_url: String,
}

/// Forge user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubUser {
    /// User login.
    pub login: String,
}

/// App installation identifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Installation {
    /// Installation id.
    pub id: u64,
}

/// What the dispatcher should do in response to a classified event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Upsert the deployment record and enqueue a build.
    CreateOrUpdate,
    /// Enqueue a destroy job for an existing deployment.
    Destroy,
    /// No action; acknowledge with `200 ignored`.
    Ignored,
}

/// Classify a pull-request action string into dispatcher intent.
#[must_use]
pub fn classify_action(action: &str) -> Intent {
    match action {
        "opened" | "reopened" | "synchronize" => Intent::CreateOrUpdate,
        "closed" | "merged" => Intent::Destroy,
        // `edited`/`labeled`/`unlabeled` never change build inputs on their
        // own; a following `synchronize` carries any real code change.
        _ => Intent::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_reopened_synchronize_create_or_update() {
        assert_eq!(classify_action("opened"), Intent::CreateOrUpdate);
        assert_eq!(classify_action("reopened"), Intent::CreateOrUpdate);
        assert_eq!(classify_action("synchronize"), Intent::CreateOrUpdate);
    }

    #[test]
    fn closed_and_merged_destroy() {
        assert_eq!(classify_action("closed"), Intent::Destroy);
        assert_eq!(classify_action("merged"), Intent::Destroy);
    }

    #[test]
    fn other_actions_ignored() {
        assert_eq!(classify_action("edited"), Intent::Ignored);
        assert_eq!(classify_action("labeled"), Intent::Ignored);
        assert_eq!(classify_action("assigned"), Intent::Ignored);
    }

    #[test]
    fn deserializes_minimal_payload() {
        let json = r#"{
            "action": "opened",
            "pull_request": {
                "number": 42,
                "title": "Add feature",
                "head": {"ref": "feat/x", "sha": "abc123"},
                "merged": false,
                "html_url": "https://forge.test/u/r/pull/42"
            },
            "repository": {
                "full_name": "u/r",
                "clone_url": "https://forge.test/u/r.git"
            }
        }"#;

        let event: PullRequestEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.pull_request.number, 42);
        assert_eq!(event.pull_request.head.ref_name, "feat/x");
        assert_eq!(event.repository.full_name, "u/r");
    }
}
