//! Shared application state threaded through every Axum handler.

use std::sync::Arc;

use previewctl_config::Config;
use previewctl_executor::{BuildExecutor, ContainerEngine, DestroyExecutor};
use previewctl_forge::ForgeClient;
use previewctl_queue::JobQueue;
use previewctl_store::DeploymentStore;
use previewctl_tunnel::TunnelRegistry;

/// Everything a handler or worker needs, cloned cheaply (everything inside
/// is already `Arc`-wrapped or itself clone-cheap).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DeploymentStore>,
    pub queue: Arc<dyn JobQueue>,
    pub tunnel_registry: Arc<TunnelRegistry>,
    pub build_executor: Arc<BuildExecutor>,
    pub destroy_executor: Arc<DestroyExecutor>,
    pub engine: ContainerEngine,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn DeploymentStore>,
        queue: Arc<dyn JobQueue>,
        forge: Option<ForgeClient>,
        engine: ContainerEngine,
    ) -> Self {
        let tunnel_registry = Arc::new(TunnelRegistry::new());
        let config = Arc::new(config);

        let build_executor = Arc::new(BuildExecutor::new(
            engine.clone(),
            store.clone(),
            tunnel_registry.clone(),
            forge,
            (*config).clone(),
        ));
        let destroy_executor =
            Arc::new(DestroyExecutor::new(engine.clone(), store.clone(), tunnel_registry.clone()));

        Self { config, store, queue, tunnel_registry, build_executor, destroy_executor, engine }
    }
}
