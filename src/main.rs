//! previewctl: a GitOps controller that materializes an ephemeral preview
//! environment for each pull request and tears it down when the PR closes.

mod dispatch;
mod routes;
mod state;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use previewctl_config::Config;
use previewctl_executor::ContainerEngine;
use previewctl_forge::ForgeClient;
use previewctl_queue::{JobQueue, RedisQueue};
use previewctl_store::{DeploymentStore, RedisStore};
use previewctl_tunnel::health as tunnel_health;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::state::AppState;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .json()
        .init();

    if config.webhook_secret.is_none() {
        error!("WEBHOOK_SECRET is not set; webhook ingress will reject every request");
    }

    let redis_url = config.redis.connection_url();

    let store: Arc<dyn DeploymentStore> = match RedisStore::connect(
        &redis_url,
        config.limits.deployment_ttl_secs,
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to Redis for the deployment store");
            std::process::exit(1);
        }
    };

    let queue: Arc<dyn JobQueue> = match RedisQueue::connect(
        &redis_url,
        config.limits.backoff_initial_secs,
        config.limits.backoff_multiplier,
        config.limits.backoff_cap_secs,
        config.limits.retained_completed,
        config.limits.retained_failed,
    )
    .await
    {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!(error = %e, "failed to connect to Redis for the job queue");
            std::process::exit(1);
        }
    };

    let engine = match ContainerEngine::connect() {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "failed to connect to the container engine");
            std::process::exit(1);
        }
    };

    let forge = match (&config.forge_app_id, &config.forge_private_key) {
        (Some(_), Some(token)) => match ForgeClient::new(token.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "failed to build forge client; comments will be skipped");
                None
            }
        },
        _ => {
            info!("no forge credentials configured; preview comments are disabled");
            None
        }
    };

    let state = AppState::new(config.clone(), store, queue, forge, engine);

    let app = build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle =
        tokio::spawn(worker::run_pool(state.clone(), state.config.job_concurrency, shutdown_rx.clone()));
    let stall_handle = tokio::spawn(worker::run_stall_recovery(
        state.clone(),
        state.config.limits.job_stall_after_secs,
        state.config.limits.job_stall_after_secs,
    ));
    let sweeper_handle = tokio::spawn(
        routes::sweeper_from_state(&state).run(state.config.limits.sweeper_interval_secs),
    );
    let tunnel_health_handle =
        tokio::spawn(tunnel_health::run(state.tunnel_registry.clone(), reqwest::Client::new()));

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr, error = %e, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };
    info!(addr, "previewctl listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("draining in-flight work");
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    stall_handle.abort();
    sweeper_handle.abort();
    tunnel_health_handle.abort();
    state.tunnel_registry.stop_all().await;
    info!("shutdown complete");
}

fn build_router(state: AppState) -> Router {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any)
    } else {
        CorsLayer::new().allow_methods(Any)
    };

    Router::new()
        .route("/webhooks/{provider}", post(dispatch::handle_webhook))
        .route("/health", get(routes::get_health))
        .route("/deployments", get(routes::list_deployments))
        .route("/deployments/{pr}", get(routes::get_deployment))
        .route("/admin/cleanup", post(routes::trigger_cleanup))
        .route("/admin/queue/stats", get(routes::queue_stats))
        .route("/admin/jobs/{id}", get(routes::get_job))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(previewctl_forge::MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
}
