//! Per-request tracing span and access log.
//!
//! Every request runs inside a `request` span carrying its id, so the
//! coordinator's and poller's events can be correlated with the HTTP call
//! that caused them.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::utils::redact::sanitize_json;

/// Only this much of a captured body is written to the log.
const MAX_LOGGED_BODY: usize = 1024;
/// Same ceiling the JSON extractors apply, so capturing never refuses a body
/// the handler would have accepted.
const MAX_CAPTURED_BODY: usize = 2 * 1024 * 1024;
const MAX_INCOMING_ID_LEN: usize = 64;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogSettings {
    pub log_body: bool,
}

/// Reuses a well-formed id sent by the dashboard, otherwise mints one.
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_INCOMING_ID_LEN
                && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn describe_body(bytes: &[u8]) -> String {
    let described = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(json) => sanitize_json(&json).to_string(),
        Err(_) => return format!("[non-json, {} bytes]", bytes.len()),
    };
    if described.len() <= MAX_LOGGED_BODY {
        return described;
    }
    let mut end = MAX_LOGGED_BODY;
    while !described.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated, {} bytes]", &described[..end], bytes.len())
}

pub async fn request_logger_middleware(
    State(settings): State<RequestLogSettings>,
    req: Request,
    next: Next,
) -> Response {
    let id = request_id(req.headers());
    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    handle(settings, id, req, next).instrument(span).await
}

async fn handle(settings: RequestLogSettings, id: String, mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let id_header = HeaderValue::from_str(&id).ok();
    if let Some(value) = &id_header {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    // Webhook bodies are signed processor payloads and are never echoed to logs.
    let capture = settings.log_body && req.uri().path() != "/webhook";
    if capture {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_CAPTURED_BODY).await {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!(limit = MAX_CAPTURED_BODY, "request body too large");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };
        tracing::info!(body_size = bytes.len(), body = %describe_body(&bytes), "request received");
        req = Request::from_parts(parts, Body::from(bytes));
    } else {
        tracing::info!("request received");
    }

    let mut response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();

    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), elapsed_ms, "request completed");
    } else {
        tracing::info!(status = status.as_u16(), elapsed_ms, "request completed");
    }

    if let Some(value) = id_header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
