//! Thin wrapper over the container engine's HTTP API (`bollard`), covering
//! exactly the verbs this controller needs: `build`, `run`, `stop`, `rm`,
//! `rmi`, `inspect`, `port`, `ps`, `images`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::{BuildImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::ExecutorError;

/// Connects to the local container engine socket and exposes the handful
/// of operations the build/destroy executors need.
#[derive(Clone)]
pub struct ContainerEngine {
    docker: Docker,
}

impl ContainerEngine {
    /// Connect using the platform default (Unix socket on Linux/macOS,
    /// named pipe on Windows).
    pub fn connect() -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults().map_err(|_| ExecutorError::EngineUnavailable)?;
        Ok(Self { docker })
    }

    /// Pre-flight reachability check: a version probe with a short timeout.
    pub async fn ping(&self, timeout: Duration) -> Result<(), ExecutorError> {
        tokio::time::timeout(timeout, self.docker.version())
            .await
            .map_err(|_| ExecutorError::EngineUnavailable)?
            .map_err(|_| ExecutorError::EngineUnavailable)?;
        Ok(())
    }

    /// Build an image from `context_dir`, tagging it `image_tag`. The build
    /// recipe is located at `dockerfile_rel_path` relative to the context
    /// root.
    pub async fn build_image(
        &self,
        context_dir: &Path,
        dockerfile_rel_path: &str,
        image_tag: &str,
        timeout: Duration,
    ) -> Result<(), ExecutorError> {
        let tar_bytes = tar_directory(context_dir)
            .map_err(|e| ExecutorError::BuildFailed(format!("failed to package build context: {e}")))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile_rel_path.to_string(),
            t: image_tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let build = async {
            let mut stream = self.docker.build_image(options, None, Some(tar_bytes.into()));
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(info) => {
                        if let Some(stream_line) = &info.stream {
                            debug!(image_tag, line = %stream_line.trim_end(), "build output");
                        }
                        if let Some(err) = info.error {
                            return Err(ExecutorError::BuildFailed(err));
                        }
                    }
                    Err(e) => return Err(ExecutorError::BuildFailed(e.to_string())),
                }
            }
            Ok(())
        };

        match tokio::time::timeout(timeout, build).await {
            Ok(result) => {
                if result.is_err() {
                    let _ = self.remove_image(image_tag).await;
                }
                result
            }
            Err(_) => {
                let _ = self.remove_image(image_tag).await;
                Err(ExecutorError::BuildFailed("timed out".to_string()))
            }
        }
    }

    /// Create and start the image detached, mapping `host_port` to
    /// `container_port`.
    pub async fn run_container(
        &self,
        name: &str,
        image_tag: &str,
        host_port: u16,
        container_port: u16,
        timeout: Duration,
    ) -> Result<String, ExecutorError> {
        let container_port_key = format!("{container_port}/tcp");
        let mut port_bindings = PortMap::new();
        port_bindings.insert(
            container_port_key.clone(),
            Some(vec![PortBinding { host_ip: Some("0.0.0.0".to_string()), host_port: Some(host_port.to_string()) }]),
        );

        let config = Config {
            image: Some(image_tag.to_string()),
            exposed_ports: Some(HashMap::from([(container_port_key, HashMap::new())])),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                publish_all_ports: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let run = async {
            let created = self
                .docker
                .create_container(Some(CreateContainerOptions { name: name.to_string(), platform: None }), config)
                .await
                .map_err(|e| ExecutorError::RunFailed(e.to_string()))?;

            self.docker
                .start_container::<String>(&created.id, None)
                .await
                .map_err(|e| ExecutorError::RunFailed(e.to_string()))?;

            Ok(created.id)
        };

        tokio::time::timeout(timeout, run).await.map_err(|_| ExecutorError::RunFailed("timed out".to_string()))?
    }

    /// Prefer the engine-level health status if the image defines a
    /// `HEALTHCHECK`; otherwise report `None` (caller falls back to "running
    /// and port bound").
    pub async fn health_status(&self, container_id: &str) -> Option<String> {
        let inspect = self.docker.inspect_container(container_id, None).await.ok()?;
        inspect.state?.health?.status.map(|s| s.to_string())
    }

    /// Graceful stop with a bounded timeout.
    pub async fn stop_container(&self, container_id: &str, timeout_secs: i64) -> Result<(), ExecutorError> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: timeout_secs }))
            .await
            .map_err(|e| ExecutorError::RunFailed(e.to_string()))
    }

    /// Remove a container; `force` performs a forced remove (used as the
    /// fallback after a graceful remove fails).
    pub async fn remove_container(&self, container_id: &str, force: bool) -> Result<(), ExecutorError> {
        self.docker
            .remove_container(container_id, Some(RemoveContainerOptions { force, ..Default::default() }))
            .await
            .map_err(|e| ExecutorError::RunFailed(e.to_string()))
    }

    /// Remove an image by tag or id. Best-effort: a missing image is not an
    /// error.
    pub async fn remove_image(&self, image_ref: &str) -> Result<(), ExecutorError> {
        match self.docker.remove_image(image_ref, Some(RemoveImageOptions { force: true, ..Default::default() }), None).await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(ExecutorError::Internal(e.to_string())),
        }
    }

    /// Every image whose repo:tag starts with `prefix` (used to sweep
    /// `preview-pr-<N>*`).
    pub async fn images_matching_prefix(&self, prefix: &str) -> Vec<String> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> { all: true, ..Default::default() }))
            .await
            .unwrap_or_default();

        images
            .into_iter()
            .flat_map(|image| image.repo_tags)
            .filter(|tag| tag.starts_with(prefix))
            .collect()
    }

    /// The image tag/id a running container was started from (used by the
    /// destroy executor to resolve an image to remove from a container id).
    pub async fn image_of_container(&self, container_id: &str) -> Option<String> {
        let inspect = self.docker.inspect_container(container_id, None).await.ok()?;
        inspect.config.and_then(|c| c.image)
    }

    /// Every container (running or not) whose name matches `name`.
    pub async fn containers_named(&self, name: &str) -> Vec<String> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions { all: true, filters, ..Default::default() }))
            .await
            .unwrap_or_default();

        containers.into_iter().filter_map(|c| c.id).collect()
    }

    /// Validate a container id/name is well-formed enough to address
    /// without contacting the engine: full 64-hex ids, or 3-64 char
    /// alphanumeric prefixes.
    #[must_use]
    pub fn is_valid_container_id(candidate: &str) -> bool {
        let len_ok = (3..=64).contains(&candidate.len());
        len_ok && candidate.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

fn tar_directory(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut bytes);
        builder.append_dir_all(".", dir)?;
        builder.finish()?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_full_hex_ids_and_short_prefixes() {
        assert!(ContainerEngine::is_valid_container_id(&"a".repeat(64)));
        assert!(ContainerEngine::is_valid_container_id("abc123"));
        assert!(ContainerEngine::is_valid_container_id(&"f".repeat(12)));
    }

    #[test]
    fn rejects_too_short_or_non_alphanumeric() {
        assert!(!ContainerEngine::is_valid_container_id("ab"));
        assert!(!ContainerEngine::is_valid_container_id("not valid!"));
        assert!(!ContainerEngine::is_valid_container_id(&"a".repeat(65)));
    }

    #[test]
    fn tars_a_directory_without_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let bytes = tar_directory(dir.path()).unwrap();
        assert!(!bytes.is_empty());
    }
}
