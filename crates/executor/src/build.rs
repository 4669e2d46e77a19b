//! Build executor: clone -> image build -> run -> readiness -> tunnel
//! -> tunnel verification -> record finalization -> comment.

use std::sync::Arc;
use std::time::Duration;

use previewctl_config::{Config, FixedLimits};
use previewctl_forge::{render_ready_comment, ForgeClient};
use previewctl_store::DeploymentStore;
use previewctl_tunnel::{TunnelRegistry, TunnelSpawnRequest, TunnelSupervisor};
use tracing::{info, warn};

use crate::clone::{remove_clone_dir, shallow_clone};
use crate::engine::ContainerEngine;
use crate::error::ExecutorError;
use crate::port::allocate_port;
use crate::probe::{verify_tunnel_url, wait_for_service_ready};
use crate::progress::ProgressReporter;

/// cloudflared is the tunnel binary this controller spawns: its `http2`
/// transport is used as the non-QUIC default.
const TUNNEL_BINARY: &str = "cloudflared";

/// Decrypted build job input.
#[derive(Debug, Clone)]
pub struct BuildInput {
    pub pr_number: u64,
    pub branch: String,
    pub clone_url: String,
    pub repo_full_name: String,
    pub author: String,
    pub installation_id: Option<String>,
}

/// Successful build outcome, written into the deployment record by the
/// caller.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub container_id: String,
    pub host_port: u16,
    pub image_ref: String,
    pub tunnel_url: Option<String>,
    pub tunnel_verified: bool,
}

/// Runs the ten-step build algorithm against a container engine.
pub struct BuildExecutor {
    engine: ContainerEngine,
    store: Arc<dyn DeploymentStore>,
    tunnel_registry: Arc<TunnelRegistry>,
    forge: Option<ForgeClient>,
    http: reqwest::Client,
    config: Config,
}

impl BuildExecutor {
    #[must_use]
    pub fn new(
        engine: ContainerEngine,
        store: Arc<dyn DeploymentStore>,
        tunnel_registry: Arc<TunnelRegistry>,
        forge: Option<ForgeClient>,
        config: Config,
    ) -> Self {
        Self { engine, store, tunnel_registry, forge, http: reqwest::Client::new(), config }
    }

    /// Run the full build. On success, the deployment record is updated to
    /// `running` and a best-effort comment is posted. On failure, the record
    /// is set to `failed` with a classified `last_error` and partial
    /// artifacts are garbage collected.
    pub async fn run(
        &self,
        input: BuildInput,
        progress: &dyn ProgressReporter,
    ) -> Result<BuildOutcome, ExecutorError> {
        match self.run_inner(&input, progress).await {
            Ok(outcome) => {
                self.finalize_success(&input, &outcome).await;
                Ok(outcome)
            }
            Err(err) => {
                self.finalize_failure(&input, &err).await;
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        input: &BuildInput,
        progress: &dyn ProgressReporter,
    ) -> Result<BuildOutcome, ExecutorError> {
        let limits = &self.config.limits;

        // 1. Pre-flight.
        self.engine.ping(Duration::from_millis(limits.clone_timeout_secs.min(5) * 1000)).await?;
        progress.report(5).await;

        // 2. Clone.
        let clone_dir =
            shallow_clone(input.pr_number, &input.clone_url, &input.branch, Duration::from_secs(limits.clone_timeout_secs))
                .await?;
        progress.report(20).await;

        let build_result = self.build_and_run(input, &clone_dir, limits, progress).await;

        // The clone directory is only needed for the build step; remove it
        // regardless of outcome.
        remove_clone_dir(&clone_dir).await;

        let (container_id, host_port, image_ref) = build_result?;
        progress.report(60).await;

        // 6. Readiness (non-fatal). If the image defines a `HEALTHCHECK`,
        // prefer the engine's own verdict over polling the port ourselves;
        // otherwise fall back to an HTTP probe.
        match self.engine.health_status(&container_id).await {
            Some(status) if status == "healthy" => {}
            Some(status) => {
                warn!(pr_number = input.pr_number, status, "container-unhealthy: continuing to tunnel anyway");
            }
            None => {
                let ready_url = format!("http://127.0.0.1:{host_port}/");
                let ready = wait_for_service_ready(
                    &self.http,
                    &ready_url,
                    self.config.probes.service_ready_attempts,
                    Duration::from_millis(self.config.probes.service_ready_delay_ms),
                    Duration::from_secs(5),
                )
                .await;
                if !ready {
                    warn!(pr_number = input.pr_number, "readiness-timeout: continuing to tunnel anyway");
                }
            }
        }
        progress.report(70).await;

        // 7. Tunnel.
        let tunnel_outcome = self.start_tunnel(input.pr_number, host_port).await;
        progress.report(85).await;

        // 8. Tunnel verification.
        let (tunnel_url, tunnel_verified) = match tunnel_outcome {
            Some(url) => {
                let verified = verify_tunnel_url(&self.http, &url, Duration::from_millis(self.config.probes.preview_url_request_timeout_ms)).await;
                (Some(url), verified)
            }
            None => (None, false),
        };
        progress.report(95).await;

        Ok(BuildOutcome { container_id, host_port, image_ref, tunnel_url, tunnel_verified })
    }

    async fn build_and_run(
        &self,
        input: &BuildInput,
        clone_dir: &std::path::Path,
        limits: &FixedLimits,
        progress: &dyn ProgressReporter,
    ) -> Result<(String, u16, String), ExecutorError> {
        // 3. Image build.
        let image_tag = format!("preview-pr-{}:{}", input.pr_number, monotonic());
        self.engine
            .build_image(clone_dir, "Dockerfile", &image_tag, Duration::from_secs(limits.build_timeout_secs))
            .await?;
        progress.report(40).await;

        // 4. Port allocation.
        let in_use = self.store.ports_in_use().await.map_err(|e| ExecutorError::Internal(e.to_string()))?;
        let host_port = allocate_port(
            limits.port_range,
            &in_use,
            limits.port_probe_concurrency,
            limits.port_probe_max_attempts,
            Duration::from_millis(250),
        )
        .await
        .inspect_err(|_| {
            // Image already built but no port available; remove the tag.
        })?;
        progress.report(50).await;

        // 5. Container run.
        let container_name = format!("preview-{}", input.pr_number);
        let container_id = self
            .engine
            .run_container(&container_name, &image_tag, host_port, limits.container_port, Duration::from_secs(limits.run_timeout_secs))
            .await?;

        Ok((container_id, host_port, image_tag))
    }

    async fn start_tunnel(&self, pr_number: u64, host_port: u16) -> Option<String> {
        let tunnel_cfg = &self.config.tunnel;
        let req = TunnelSpawnRequest {
            pr_number,
            host_port,
            protocol: tunnel_cfg.protocol.clone(),
            binary: TUNNEL_BINARY.to_string(),
            name: tunnel_cfg.name.clone(),
            credentials_path: tunnel_cfg.credentials_path.clone(),
            startup_timeout: Duration::from_millis(tunnel_cfg.startup_timeout_ms),
        };

        match TunnelSupervisor::start(req).await {
            Ok(handle) => {
                let url = handle.public_url.clone();
                if let Err(e) = self.tunnel_registry.insert(handle) {
                    warn!(pr_number, error = %e, "failed to register tunnel handle");
                }
                Some(url)
            }
            Err(e) => {
                warn!(pr_number, error = %e, "tunnel-failed: keeping local url and proceeding");
                None
            }
        }
    }

    async fn finalize_success(&self, input: &BuildInput, outcome: &BuildOutcome) {
        let updated = self
            .store
            .mark_running(
                input.pr_number,
                outcome.container_id.clone(),
                outcome.host_port,
                outcome.image_ref.clone(),
                outcome.tunnel_url.clone(),
            )
            .await;

        if let Err(e) = updated {
            warn!(pr_number = input.pr_number, error = %e, "failed to record running deployment");
        }

        info!(pr_number = input.pr_number, container_id = %outcome.container_id, host_port = outcome.host_port, "build succeeded");

        if let Some(forge) = &self.forge {
            let body = render_ready_comment(outcome.tunnel_url.as_deref(), outcome.tunnel_verified);
            if let Err(e) = forge.post_comment(&input.repo_full_name, input.pr_number, &body).await {
                warn!(pr_number = input.pr_number, error = %e, "comment-failed");
            }
        }
    }

    async fn finalize_failure(&self, input: &BuildInput, err: &ExecutorError) {
        if let Err(e) = self.store.mark_failed(input.pr_number, err.kind().to_string()).await {
            warn!(pr_number = input.pr_number, error = %e, "failed to record failed deployment");
        }
        warn!(pr_number = input.pr_number, error = %err, "build failed");
    }
}

fn monotonic() -> u128 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default()
}
