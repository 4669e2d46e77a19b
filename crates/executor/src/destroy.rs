//! Destroy executor: stop/remove container, remove image(s), stop tunnel,
//! drop record.

use std::sync::Arc;

use previewctl_store::DeploymentStore;
use previewctl_tunnel::TunnelRegistry;
use tracing::{info, warn};

use crate::engine::ContainerEngine;
use crate::error::ExecutorError;

/// Destroy job input.
#[derive(Debug, Clone)]
pub struct DestroyInput {
    pub pr_number: u64,
    pub container_id: Option<String>,
    pub remove_image: bool,
}

/// Per-step failure accounting, returned to the caller and logged
/// field-by-field.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DestroyReport {
    pub stopped: bool,
    pub removed: bool,
    pub images_removed: Vec<String>,
    pub errors: Vec<String>,
}

impl DestroyReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.removed
    }
}

/// Runs the six-step teardown.
pub struct DestroyExecutor {
    engine: ContainerEngine,
    store: Arc<dyn DeploymentStore>,
    tunnel_registry: Arc<TunnelRegistry>,
}

impl DestroyExecutor {
    #[must_use]
    pub fn new(engine: ContainerEngine, store: Arc<dyn DeploymentStore>, tunnel_registry: Arc<TunnelRegistry>) -> Self {
        Self { engine, store, tunnel_registry }
    }

    /// Tear down a PR's preview environment. Every step is best-effort with
    /// independent failure accounting in the returned [`DestroyReport`]; the
    /// record is deleted from the store only if the container was removed.
    pub async fn run(&self, input: DestroyInput) -> Result<DestroyReport, ExecutorError> {
        let mut report = DestroyReport::default();

        let container_ids = self.resolve_targets(&input, &mut report).await;

        for container_id in &container_ids {
            self.stop_and_remove(container_id, &mut report).await;
        }

        if input.remove_image {
            self.remove_images(&input, &container_ids, &mut report).await;
        }

        let container_name = format!("preview-{}", input.pr_number);
        for residual in self.engine.containers_named(&container_name).await {
            if !container_ids.contains(&residual) {
                self.stop_and_remove(&residual, &mut report).await;
            }
        }

        if let Err(e) = self.tunnel_registry.stop(input.pr_number).await {
            report.errors.push(format!("tunnel stop failed: {e}"));
        }

        if report.succeeded() {
            if let Err(e) = self.store.delete(input.pr_number).await {
                report.errors.push(format!("store delete failed: {e}"));
            }
            info!(pr_number = input.pr_number, ?report, "destroy completed");
        } else {
            let aggregated = report.errors.join("; ");
            if let Err(e) = self.store.mark_failed(input.pr_number, format!("destroy-partial: {aggregated}")).await {
                warn!(pr_number = input.pr_number, error = %e, "failed to record destroy-partial");
            }
            warn!(pr_number = input.pr_number, ?report, "destroy-partial");
        }

        Ok(report)
    }

    async fn resolve_targets(&self, input: &DestroyInput, report: &mut DestroyReport) -> Vec<String> {
        match &input.container_id {
            Some(id) if ContainerEngine::is_valid_container_id(id) => vec![id.clone()],
            Some(id) => {
                report.errors.push(format!("invalid-container-id: {id}"));
                Vec::new()
            }
            None => {
                let name = format!("preview-{}", input.pr_number);
                self.engine.containers_named(&name).await
            }
        }
    }

    async fn stop_and_remove(&self, container_id: &str, report: &mut DestroyReport) {
        match self.engine.stop_container(container_id, 30).await {
            Ok(()) => report.stopped = true,
            Err(e) => report.errors.push(format!("stop failed for {container_id}: {e}")),
        }

        match self.engine.remove_container(container_id, false).await {
            Ok(()) => report.removed = true,
            Err(e) => {
                warn!(container_id, error = %e, "graceful remove failed, forcing");
                match self.engine.remove_container(container_id, true).await {
                    Ok(()) => report.removed = true,
                    Err(e) => report.errors.push(format!("forced remove failed for {container_id}: {e}")),
                }
            }
        }
    }

    async fn remove_images(&self, input: &DestroyInput, container_ids: &[String], report: &mut DestroyReport) {
        for container_id in container_ids {
            if let Some(image_ref) = self.engine.image_of_container(container_id).await {
                match self.engine.remove_image(&image_ref).await {
                    Ok(()) => report.images_removed.push(image_ref),
                    Err(e) => report.errors.push(format!("image remove failed for {container_id}: {e}")),
                }
            }
        }

        let prefix = format!("preview-pr-{}", input.pr_number);
        for tag in self.engine.images_matching_prefix(&prefix).await {
            if report.images_removed.contains(&tag) {
                continue;
            }
            match self.engine.remove_image(&tag).await {
                Ok(()) => report.images_removed.push(tag),
                Err(e) => report.errors.push(format!("image remove failed for {tag}: {e}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_succeeds_only_when_container_removed() {
        let mut report = DestroyReport::default();
        assert!(!report.succeeded());
        report.removed = true;
        assert!(report.succeeded());
    }
}
