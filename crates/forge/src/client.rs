//! Code-forge REST client for posting PR status comments.
//!
//! Comment posting is best-effort: building the comment body and making the
//! call, using `reqwest` with a fixed default header set, `Bearer` auth, and
//! an explicit API version header.

use serde_json::json;
use tracing::{debug, warn};

const USER_AGENT: &str = "previewctl/0.1";

/// Errors from the forge REST client.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// The underlying HTTP request failed.
    #[error("forge request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The forge responded with a non-2xx status.
    #[error("forge returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Minimal client for posting comments on a pull request.
#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl ForgeClient {
    /// Build a client against the default API base, authenticated with a
    /// bearer token (an installation token or PAT, depending on deployment).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(token: impl Into<String>) -> Result<Self, ForgeError> {
        Self::with_api_base(token, "https://api.github.com".to_string())
    }

    /// Build a client against an explicit API base (used by tests to point
    /// at a `wiremock` server).
    pub fn with_api_base(token: impl Into<String>, api_base: String) -> Result<Self, ForgeError> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http, api_base, token: token.into() })
    }

    /// Post a comment on the given PR's issue thread. Comment failure is a
    /// warning: callers should swallow the error rather than fail the job.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError`] if the request could not be sent or the forge
    /// rejected it; the build/destroy executors treat this as non-fatal.
    pub async fn post_comment(
        &self,
        repo_full_name: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let url = format!("{}/repos/{repo_full_name}/issues/{pr_number}/comments", self.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "body": body }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, %body, "forge rejected comment");
            return Err(ForgeError::Status { status, body });
        }

        debug!(repo = %repo_full_name, pr_number, "posted preview comment");
        Ok(())
    }
}

/// Render the standard "preview is ready" comment body.
#[must_use]
pub fn render_ready_comment(tunnel_url: Option<&str>, tunnel_verified: bool) -> String {
    match tunnel_url {
        Some(url) if tunnel_verified => {
            format!("🚀 Preview environment is ready: {url}")
        }
        Some(url) => {
            format!(
                "🚀 Preview environment is ready: {url}\n\n_Note: the tunnel may still be propagating._"
            )
        }
        None => "🚀 Preview environment is running, but no public URL could be obtained.".to_string(),
    }
}

/// Render the standard "preview failed" comment body.
#[must_use]
pub fn render_failed_comment(reason: &str) -> String {
    format!("❌ Preview environment failed to build: `{reason}`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_comment_successfully() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/u/r/issues/42/comments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let client = ForgeClient::with_api_base("token", server.uri()).unwrap();
        let result = client.post_comment("u/r", 42, "hello").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn surfaces_non_2xx_as_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/u/r/issues/42/comments"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = ForgeClient::with_api_base("token", server.uri()).unwrap();
        let result = client.post_comment("u/r", 42, "hello").await;
        assert!(matches!(result, Err(ForgeError::Status { status: 403, .. })));
    }

    #[test]
    fn ready_comment_notes_unverified_tunnel() {
        let body = render_ready_comment(Some("https://preview.example/pr-42"), false);
        assert!(body.contains("may still be propagating"));
    }

    #[test]
    fn ready_comment_omits_note_when_verified() {
        let body = render_ready_comment(Some("https://preview.example/pr-42"), true);
        assert!(!body.contains("may still be propagating"));
    }
}
