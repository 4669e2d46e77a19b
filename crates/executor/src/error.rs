//! Executor error kinds — the classified `last_error` taxonomy.

/// Errors from the build or destroy executor. The `Display` of each variant
/// is the exact `last_error` prefix recorded on the deployment.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("engine-unavailable")]
    EngineUnavailable,
    #[error("clone-failed: {0}")]
    CloneFailed(String),
    #[error("build-failed: {0}")]
    BuildFailed(String),
    #[error("no-free-port")]
    NoFreePort,
    #[error("run-failed: {0}")]
    RunFailed(String),
    #[error("tunnel-failed: {0}")]
    TunnelFailed(String),
    #[error("decrypt-error")]
    DecryptError,
    #[error("invalid-container-id")]
    InvalidContainerId,
    #[error("internal: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// The stable `last_error` kind string, without the detail suffix.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EngineUnavailable => "engine-unavailable",
            Self::CloneFailed(_) => "clone-failed",
            Self::BuildFailed(_) => "build-failed",
            Self::NoFreePort => "no-free-port",
            Self::RunFailed(_) => "run-failed",
            Self::TunnelFailed(_) => "tunnel-failed",
            Self::DecryptError => "decrypt-error",
            Self::InvalidContainerId => "invalid-container-id",
            Self::Internal(_) => "internal",
        }
    }

    /// Non-retryable kinds bypass the queue's backoff/retry loop.
    #[must_use]
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::InvalidContainerId | Self::DecryptError)
    }
}

impl From<previewctl_crypto::CryptoError> for ExecutorError {
    fn from(_: previewctl_crypto::CryptoError) -> Self {
        Self::DecryptError
    }
}
