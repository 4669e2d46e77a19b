//! Code-forge webhook ingestion: signature verification, payload parsing,
//! event classification, and a best-effort PR comment client.

pub mod client;
pub mod payload;
pub mod signature;

pub use client::{render_failed_comment, render_ready_comment, ForgeClient, ForgeError};
pub use payload::{classify_action, GitRef, Installation, Intent, PullRequest, PullRequestEvent, Repository};
pub use signature::{body_within_limit, verify_webhook_signature, MAX_BODY_BYTES};
