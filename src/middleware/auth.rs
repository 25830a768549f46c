use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use crate::error::AppError;
use crate::utils::{redact, redact_opt};

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-api-key";

const COMPARE_KEY: &[u8] = b"terminal-bridge/api-key-compare";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("API key is not configured on the server")]
    Misconfigured,
    #[error("Invalid or missing API key")]
    Unauthorized,
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Misconfigured => AppError::Misconfigured(e.to_string()),
            AuthError::Unauthorized => AppError::Unauthorized(e.to_string()),
        }
    }
}

/// Validates the shared-secret credential carried by privileged requests.
#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    expected: Option<Arc<str>>,
}

impl ApiKeyAuthenticator {
    pub fn new(expected: Option<String>) -> Self {
        Self {
            expected: expected.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn authorize(&self, candidate: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = self.expected.as_deref() else {
            tracing::error!("API_KEY is not set, rejecting privileged request");
            return Err(AuthError::Misconfigured);
        };

        let authorized = match candidate {
            Some(c) if !c.is_empty() => constant_time_eq(c, expected),
            _ => false,
        };

        if authorized {
            tracing::debug!(candidate = %redact_opt(candidate), "API key accepted");
            Ok(())
        } else {
            tracing::warn!(
                candidate = %redact_opt(candidate),
                expected = %redact(expected),
                "API key rejected"
            );
            Err(AuthError::Unauthorized)
        }
    }
}

// Both sides are MACed under a fixed key so the comparison runs over equal-length
// tags and hmac's verify_slice does it in constant time.
fn constant_time_eq(candidate: &str, expected: &str) -> bool {
    let tag = |value: &str| {
        HmacSha256::new_from_slice(COMPARE_KEY).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };

    match (tag(candidate), tag(expected)) {
        (Ok(candidate_mac), Ok(expected_mac)) => {
            let expected_bytes = expected_mac.finalize().into_bytes();
            candidate_mac.verify_slice(&expected_bytes).is_ok()
        }
        _ => false,
    }
}

pub async fn require_api_key(
    State(authenticator): State<ApiKeyAuthenticator>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let candidate = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    authenticator.authorize(candidate)?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    #[test]
    fn test_exact_match_required() {
        let auth = ApiKeyAuthenticator::new(Some("dashboard-key-1234".to_string()));
        assert_eq!(auth.authorize(Some("dashboard-key-1234")), Ok(()));
        assert_eq!(auth.authorize(Some("dashboard-key-123")), Err(AuthError::Unauthorized));
        assert_eq!(auth.authorize(Some("dashboard-key-12345")), Err(AuthError::Unauthorized));
        assert_eq!(auth.authorize(Some("")), Err(AuthError::Unauthorized));
        assert_eq!(auth.authorize(None), Err(AuthError::Unauthorized));
    }

    #[test]
    fn test_unset_secret_is_misconfigured() {
        let auth = ApiKeyAuthenticator::new(None);
        assert_eq!(auth.authorize(Some("anything")), Err(AuthError::Misconfigured));

        let blank = ApiKeyAuthenticator::new(Some(String::new()));
        assert_eq!(blank.authorize(None), Err(AuthError::Misconfigured));
    }

    fn app(auth: ApiKeyAuthenticator) -> Router {
        Router::new()
            .route("/private", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(auth, require_api_key))
    }

    #[tokio::test]
    async fn test_middleware_status_codes() {
        let auth = ApiKeyAuthenticator::new(Some("dashboard-key-1234".to_string()));

        let ok = app(auth.clone())
            .oneshot(
                HttpRequest::builder()
                    .uri("/private")
                    .header(API_KEY_HEADER, "dashboard-key-1234")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let wrong = app(auth)
            .oneshot(
                HttpRequest::builder()
                    .uri("/private")
                    .header(API_KEY_HEADER, "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

        let unset = app(ApiKeyAuthenticator::new(None))
            .oneshot(HttpRequest::builder().uri("/private").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(unset.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
