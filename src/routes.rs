//! Read-only and admin HTTP routes: health, deployment listing, queue/job
//! introspection, and an on-demand sweep trigger.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use previewctl_health::{compute_snapshot, read_resident_memory_bytes, read_total_memory_bytes, Status};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::state::AppState;

static PROCESS_CLOCK: std::sync::OnceLock<previewctl_health::ProcessClock> = std::sync::OnceLock::new();

fn process_clock() -> &'static previewctl_health::ProcessClock {
    PROCESS_CLOCK.get_or_init(previewctl_health::ProcessClock::new)
}

/// `GET /health`.
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let engine_reachable =
        state.engine.ping(Duration::from_millis(state.config.probes.container_health_timeout_ms)).await.is_ok();

    let records = state.store.list().await.unwrap_or_default();
    let dead_letter_depth = state.queue.stats().await.map(|s| s.dead_letter).unwrap_or(0);
    let tunnels_unhealthy = state.tunnel_registry.count_unhealthy().await;

    let snapshot = compute_snapshot(
        engine_reachable,
        &records,
        process_clock().uptime_secs(),
        read_resident_memory_bytes(),
        read_total_memory_bytes(),
        dead_letter_depth,
        tunnels_unhealthy,
    );

    let status_code = match snapshot.status {
        Status::Healthy => StatusCode::OK,
        Status::Degraded => StatusCode::PARTIAL_CONTENT,
        Status::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(snapshot))
}

/// `GET /deployments`.
pub async fn list_deployments(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list().await {
        Ok(records) => (StatusCode::OK, Json(json!(records))),
        Err(e) => {
            warn!(error = %e, "failed to list deployments");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}

/// `GET /deployments/:pr`.
pub async fn get_deployment(State(state): State<AppState>, Path(pr_number): Path<u64>) -> impl IntoResponse {
    match state.store.get(pr_number).await {
        Ok(Some(record)) => (StatusCode::OK, Json(json!(record))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"status": "error", "reason": "not-found"}))),
        Err(e) => {
            warn!(pr_number, error = %e, "failed to fetch deployment");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    #[serde(rename = "maxAge")]
    max_age_hours: Option<i64>,
}

/// `POST /admin/cleanup?maxAge=<hours>`. Triggers an immediate sweep pass
/// rather than waiting for the periodic timer.
pub async fn trigger_cleanup(State(state): State<AppState>, Query(query): Query<CleanupQuery>) -> impl IntoResponse {
    let max_age_secs = query.max_age_hours.map(|h| h * 3600).unwrap_or(state.config.limits.sweeper_stale_after_secs);

    let sweeper = previewctl_health::Sweeper::new(
        state.store.clone(),
        state.queue.clone(),
        max_age_secs,
        state.config.limits.max_job_attempts,
    );
    let requeued = sweeper.sweep_once().await;

    (StatusCode::OK, Json(json!({"status": "ok", "requeued": requeued})))
}

/// `GET /admin/queue/stats`.
pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.stats().await {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))),
        Err(e) => {
            warn!(error = %e, "failed to fetch queue stats");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}

/// `GET /admin/jobs/:id`.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> impl IntoResponse {
    match state.queue.get(job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(json!(job))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"status": "error", "reason": "not-found"}))),
        Err(e) => {
            warn!(%job_id, error = %e, "failed to fetch job");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}

/// Lets [`crate::worker`] construct a [`previewctl_health::Sweeper`] without
/// duplicating the field list.
#[must_use]
pub fn sweeper_from_state(state: &AppState) -> previewctl_health::Sweeper {
    previewctl_health::Sweeper::new(
        state.store.clone(),
        Arc::clone(&state.queue),
        state.config.limits.sweeper_stale_after_secs,
        state.config.limits.max_job_attempts,
    )
}
