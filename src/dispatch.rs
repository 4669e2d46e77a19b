//! Webhook ingress: signature verification and event dispatch.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use previewctl_crypto::encrypt_field;
use previewctl_forge::{body_within_limit, classify_action, verify_webhook_signature, Intent, PullRequestEvent};
use previewctl_queue::{BuildJobPayload, DestroyJobPayload, JobKind, Priority};
use previewctl_store::{DeploymentRecord, StoreError};
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// `POST /webhooks/<provider>`.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(_provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    if !body_within_limit(body.len()) {
        return (StatusCode::PAYLOAD_TOO_LARGE, Json(json!({"status": "error", "reason": "payload-too-large"})));
    }

    let Some(secret) = state.config.webhook_secret.as_deref() else {
        warn!("webhook received but no WEBHOOK_SECRET configured");
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": "error", "reason": "signature-invalid"})));
    };

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !verify_webhook_signature(&body, signature, secret) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": "error", "reason": "signature-invalid"})));
    }

    let event: PullRequestEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "failed to parse webhook payload");
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "error", "reason": "malformed-payload"})));
        }
    };

    match classify_action(&event.action) {
        Intent::Ignored => (StatusCode::OK, Json(json!({"status": "ignored"}))),
        Intent::CreateOrUpdate => handle_create_or_update(&state, event, secret).await,
        Intent::Destroy => handle_destroy(&state, event).await,
    }
}

async fn handle_create_or_update(
    state: &AppState,
    event: PullRequestEvent,
    secret: &str,
) -> (StatusCode, Json<serde_json::Value>) {
    let pr = &event.pull_request;
    let author = pr.user.as_ref().map(|u| u.login.clone()).unwrap_or_default();

    let record = DeploymentRecord::new_queued(
        pr.number,
        pr.head.ref_name.clone(),
        pr.head.sha.clone(),
        pr.title.clone(),
        author.clone(),
        event.repository.full_name.clone(),
        event.repository.clone_url.clone(),
    );

    let upserted = match state.store.upsert_for_webhook(record).await {
        Ok(record) => record,
        Err(StoreError::Conflict(reason)) => {
            info!(pr_number = pr.number, reason, "webhook ignored: state-conflict");
            return (StatusCode::CONFLICT, Json(json!({"status": "error", "reason": "state-conflict"})));
        }
        Err(e) => {
            warn!(pr_number = pr.number, error = %e, "failed to upsert deployment record");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})));
        }
    };

    if let Err(e) = state.store.start_building(upserted.pr_number).await {
        warn!(pr_number = pr.number, error = %e, "failed to transition to building");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})));
    }

    let clone_url = match encrypt_field(secret, &event.repository.clone_url) {
        Ok(field) => field,
        Err(e) => {
            warn!(pr_number = pr.number, error = %e, "failed to encrypt clone_url");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})));
        }
    };

    let payload = BuildJobPayload {
        pr_number: pr.number,
        branch: pr.head.ref_name.clone(),
        clone_url,
        repo_full_name: event.repository.full_name.clone(),
        author,
        installation_id: event.installation.map(|i| i.id.to_string()),
    };

    match state
        .queue
        .enqueue(JobKind::BuildContainer(payload), Priority::High, state.config.limits.max_job_attempts)
        .await
    {
        Ok(job) => {
            info!(pr_number = pr.number, job_id = %job.id, "build job enqueued");
            (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "job_id": job.id})))
        }
        Err(e) => {
            warn!(pr_number = pr.number, error = %e, "failed to enqueue build job");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}

async fn handle_destroy(state: &AppState, event: PullRequestEvent) -> (StatusCode, Json<serde_json::Value>) {
    let pr_number = event.pull_request.number;

    let existing = match state.store.get(pr_number).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!(pr_number, error = %e, "failed to look up deployment record");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})));
        }
    };

    let Some(record) = existing else {
        return (StatusCode::OK, Json(json!({"status": "ignored", "reason": "no-deployment"})));
    };
    if record.container_id.is_none() {
        return (StatusCode::OK, Json(json!({"status": "ignored", "reason": "no-deployment"})));
    }

    if let Err(e) = state.store.start_destroying(pr_number).await {
        warn!(pr_number, error = %e, "failed to transition to destroying");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})));
    }

    let payload = DestroyJobPayload { pr_number, container_id: record.container_id };
    match state
        .queue
        .enqueue(JobKind::DestroyContainer(payload), Priority::Normal, state.config.limits.max_job_attempts)
        .await
    {
        Ok(job) => {
            info!(pr_number, job_id = %job.id, "destroy job enqueued");
            (StatusCode::ACCEPTED, Json(json!({"status": "accepted", "job_id": job.id})))
        }
        Err(e) => {
            warn!(pr_number, error = %e, "failed to enqueue destroy job");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "error", "reason": "internal"})))
        }
    }
}
