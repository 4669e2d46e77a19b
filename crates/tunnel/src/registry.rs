//! Global registry of active tunnels: at most one live tunnel per PR.

use dashmap::DashMap;

use crate::error::TunnelError;
use crate::supervisor::TunnelHandle;

/// Tracks one [`TunnelHandle`] per PR. Shared via `Arc` across the worker
/// pool and the destroy path.
#[derive(Default)]
pub struct TunnelRegistry {
    handles: DashMap<u64, TunnelHandle>,
}

impl TunnelRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly started tunnel. Fails if one is already registered
    /// for this PR (global invariant: at most one live tunnel per PR).
    pub fn insert(&self, handle: TunnelHandle) -> Result<(), TunnelError> {
        let pr_number = handle.pr_number;
        match self.handles.entry(pr_number) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TunnelError::AlreadyActive(pr_number)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Look up the active tunnel for a PR, if any.
    #[must_use]
    pub fn get(&self, pr_number: u64) -> Option<TunnelHandle> {
        self.handles.get(&pr_number).map(|entry| entry.value().clone())
    }

    /// Stop and remove the tunnel for a PR, if one exists. A no-op if none
    /// is registered.
    pub async fn stop(&self, pr_number: u64) -> Result<(), TunnelError> {
        let Some((_, handle)) = self.handles.remove(&pr_number) else {
            return Ok(());
        };
        handle.stop().await
    }

    /// Every PR currently holding a live tunnel (for the global shutdown
    /// hook).
    #[must_use]
    pub fn active_prs(&self) -> Vec<u64> {
        self.handles.iter().map(|entry| *entry.key()).collect()
    }

    /// Count active tunnels whose last recorded probe failed (or that have
    /// gone missing entirely, which `is_healthy` reports as `Err`).
    pub async fn count_unhealthy(&self) -> usize {
        let mut count = 0;
        for pr_number in self.active_prs() {
            let Some(handle) = self.get(pr_number) else { continue };
            if !handle.is_healthy().await.unwrap_or(false) {
                count += 1;
            }
        }
        count
    }

    /// Stop every registered tunnel. Used on process shutdown.
    pub async fn stop_all(&self) {
        let prs: Vec<u64> = self.active_prs();
        for pr in prs {
            if let Err(e) = self.stop(pr).await {
                tracing::warn!(pr_number = pr, error = %e, "failed to stop tunnel during shutdown");
            }
        }
    }
}
