//! Optional background health monitor: `HEAD`-probes each active tunnel
//! every 30 s, tracks consecutive failures, never mutates deployment
//! state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::registry::TunnelRegistry;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodically `HEAD`-probes every registered tunnel's public URL.
///
/// Runs until the surrounding task is aborted (process shutdown). Each
/// probe's outcome is recorded on the tunnel's own handle (queryable via
/// `TunnelHandle::is_healthy`/`TunnelRegistry::count_unhealthy`) and logged;
/// the deployment record is never touched from here.
pub async fn run(registry: Arc<TunnelRegistry>, client: reqwest::Client) {
    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    loop {
        interval.tick().await;
        for pr_number in registry.active_prs() {
            let Some(handle) = registry.get(pr_number) else { continue };
            let result = tokio::time::timeout(PROBE_TIMEOUT, client.head(&handle.public_url).send()).await;

            let ok = match result {
                Ok(Ok(resp)) if resp.status().is_success() || resp.status().is_redirection() => {
                    debug!(pr_number, status = %resp.status(), "tunnel health probe ok");
                    true
                }
                Ok(Ok(resp)) => {
                    warn!(pr_number, status = %resp.status(), "tunnel health probe returned an error status");
                    false
                }
                Ok(Err(e)) => {
                    warn!(pr_number, error = %e, "tunnel health probe failed");
                    false
                }
                Err(_) => {
                    warn!(pr_number, "tunnel health probe timed out");
                    false
                }
            };
            handle.record_probe(ok).await;
        }
    }
}
