//! API-key authentication and per-key rate limiting middleware.
//!
//! The presented key comes from `X-API-Key` or `Authorization: Bearer`,
//! treated as equivalent. Validation is delegated to the store (prefix
//! narrowing + constant-time hash compare); the authenticated key's
//! identity lands in request extensions for handlers and rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use uuid::Uuid;

use scanorama_core::ErrorCode;
use scanorama_store::StoreError;

use crate::response::{ApiError, RequestId};
use crate::server::SharedState;

/// Identity of the authenticated key, available to handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: Uuid,
    pub key_prefix: String,
    pub name: String,
}

/// Keyed limiter: one token bucket per API key prefix.
pub type KeyLimiter = DefaultKeyedRateLimiter<String>;

pub fn build_limiter(per_minute: u32) -> Option<Arc<KeyLimiter>> {
    NonZeroU32::new(per_minute).map(|n| Arc::new(RateLimiter::keyed(Quota::per_minute(n))))
}

/// Stamp a correlation id onto every request before anything else runs.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(RequestId(Uuid::new_v4()));
    next.run(request).await
}

/// Authentication + rate limiting for the protected route tree.
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .copied()
        .unwrap_or(RequestId(Uuid::new_v4()));

    if !state.config.auth_enabled {
        return next.run(request).await;
    }

    let Some(presented) = extract_key(&request) else {
        return ApiError::new(ErrorCode::Unauthorized, "missing API key", request_id)
            .into_response();
    };

    // Static bootstrap keys from configuration bypass the store lookup.
    if state.config.api_keys.iter().any(|k| k == &presented) {
        request.extensions_mut().insert(AuthContext {
            key_id: Uuid::nil(),
            key_prefix: "configured".to_string(),
            name: "configured".to_string(),
        });
        if let Some(limiter) = &state.limiter {
            if limiter.check_key(&"configured".to_string()).is_err() {
                return ApiError::new(
                    ErrorCode::RateLimited,
                    "per-key request quota exceeded",
                    request_id,
                )
                .into_response();
            }
        }
        return next.run(request).await;
    }

    let key = match state.store.authenticate_api_key(&presented).await {
        Ok(key) => key,
        Err(StoreError::Forbidden) => {
            return ApiError::new(
                ErrorCode::Forbidden,
                "API key is inactive or expired",
                request_id,
            )
            .into_response();
        }
        Err(StoreError::Unauthorized) => {
            return ApiError::new(ErrorCode::Unauthorized, "invalid API key", request_id)
                .into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "API key validation failed");
            return ApiError::new(ErrorCode::Internal, "authentication backend error", request_id)
                .into_response();
        }
    };

    if let Some(limiter) = &state.limiter {
        if limiter.check_key(&key.key_prefix).is_err() {
            return ApiError::new(
                ErrorCode::RateLimited,
                "per-key request quota exceeded",
                request_id,
            )
            .into_response();
        }
    }

    tracing::debug!(key = %key.key_prefix, name = %key.name, "Authenticated request");
    request.extensions_mut().insert(AuthContext {
        key_id: key.id,
        key_prefix: key.key_prefix,
        name: key.name,
    });
    next.run(request).await
}

/// `X-API-Key: <key>` and `Authorization: Bearer <key>` are equivalent.
fn extract_key(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key") {
        let key = value.to_str().ok()?.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    let auth = request.headers().get("authorization")?.to_str().ok()?;
    let token = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer "))?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_header(name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn x_api_key_header_wins() {
        let request = request_with_header("x-api-key", "sk_abc123");
        assert_eq!(extract_key(&request).as_deref(), Some("sk_abc123"));
    }

    #[test]
    fn bearer_header_is_equivalent() {
        let request = request_with_header("authorization", "Bearer sk_abc123");
        assert_eq!(extract_key(&request).as_deref(), Some("sk_abc123"));
    }

    #[test]
    fn missing_and_malformed_headers_yield_none() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_key(&request), None);

        let request = request_with_header("authorization", "Basic dXNlcjpwYXNz");
        assert_eq!(extract_key(&request), None);

        let request = request_with_header("x-api-key", "   ");
        assert_eq!(extract_key(&request), None);
    }

    #[test]
    fn limiter_disabled_at_zero() {
        assert!(build_limiter(0).is_none());
        assert!(build_limiter(60).is_some());
    }
}
