use crate::coalescer::EventCoalescer;
use crate::config::{SignatureConfig, SignatureMethod};
use crate::error::ApiError;
use crate::types::{DeadLetterEntry, QueueStats, ReprocessReport, WebhookEvent};
use crate::verification;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub coalescer: EventCoalescer,
    pub signature: SignatureConfig,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/hubspot", post(receive_webhook))
        .route("/admin/queue/stats", get(queue_stats))
        .route(
            "/admin/queue/dead-letters",
            get(list_dead_letters).delete(clear_dead_letters),
        )
        .route(
            "/admin/queue/dead-letters/reprocess",
            post(reprocess_dead_letters),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Provider-facing endpoint. Replies as soon as the batch is buffered; dispatch
/// failures never surface here.
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    verify_signature(&state.signature, &headers, &body)?;

    let events: Vec<WebhookEvent> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {e}")))?;
    if events.is_empty() {
        return Ok(StatusCode::NO_CONTENT);
    }

    info!(count = events.len(), "received webhook batch");
    state.coalescer.enqueue(events, Utc::now()).await;
    Ok(StatusCode::NO_CONTENT)
}

fn verify_signature(
    config: &SignatureConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let verified = match config.method {
        SignatureMethod::None => true,
        SignatureMethod::V1 => {
            let sig = header_str(headers, "x-hubspot-signature");
            verification::verify_v1(&config.client_secret, body, sig)
        }
        SignatureMethod::V3 => {
            let sig = header_str(headers, "x-hubspot-signature-v3");
            let timestamp = header_str(headers, "x-hubspot-request-timestamp");
            verification::verify_v3(
                &config.client_secret,
                "POST",
                &config.public_webhook_url,
                body,
                timestamp,
                sig,
            )
        }
    };

    if verified {
        Ok(())
    } else {
        warn!("webhook signature verification failed");
        Err(ApiError::Unauthorized(
            "signature verification failed".into(),
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.coalescer.stats().await)
}

async fn list_dead_letters(State(state): State<AppState>) -> Json<Vec<DeadLetterEntry>> {
    Json(state.coalescer.dead_letters().await)
}

async fn clear_dead_letters(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.coalescer.clear_dead_letters().await;
    Json(serde_json::json!({ "cleared": cleared }))
}

async fn reprocess_dead_letters(State(state): State<AppState>) -> Json<ReprocessReport> {
    Json(state.coalescer.reprocess_dead_letters().await)
}
