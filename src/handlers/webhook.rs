use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::processor::webhook::{construct_event, SIGNATURE_HEADER};
use crate::AppState;

/// Acknowledges a signed processor event and reconciles any transaction it names.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let secret = state
        .config
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Misconfigured("STRIPE_WEBHOOK_SECRET is not set".to_string()))?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());

    let event = construct_event(
        secret,
        signature,
        &body,
        Utc::now().timestamp(),
        state.config.webhook_tolerance_secs,
    )
    .map_err(|e| {
        warn!(error = %e, body_size = body.len(), "webhook rejected");
        AppError::InvalidSignature(e.to_string())
    })?;

    let reconciled = state.coordinator.reconcile_event(&event).await;
    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        reconciled = ?reconciled,
        "webhook received"
    );

    Ok(Json(json!({ "received": true })))
}
