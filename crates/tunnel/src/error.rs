//! Tunnel error kinds.

/// Errors from spawning, verifying, or tearing down a tunnel process.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The tunnel binary could not be spawned.
    #[error("failed to spawn tunnel process: {0}")]
    Spawn(String),
    /// A fatal line was observed on stdout/stderr.
    #[error("tunnel-failed: {0}")]
    Fatal(String),
    /// No URL and no fatal line within the startup window.
    #[error("tunnel-failed: startup timed out with no public url")]
    StartupTimeout,
    /// The supervisor's background task is gone (process already exited).
    #[error("tunnel supervisor unavailable")]
    SupervisorGone,
    /// An already-registered tunnel exists for this PR (at most one live
    /// tunnel per PR).
    #[error("tunnel already active for pr {0}")]
    AlreadyActive(u64),
}
