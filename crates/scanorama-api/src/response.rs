//! Uniform response envelope and error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use scanorama_core::ErrorCode;
use scanorama_engine::EngineError;
use scanorama_store::StoreError;

/// Per-request correlation id, stamped by middleware and echoed in every
/// envelope.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// The response envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> Envelope<T> {
    pub fn data(request_id: RequestId, data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            message: None,
            request_id: request_id.0,
            timestamp: Utc::now(),
        }
    }

    pub fn message(request_id: RequestId, data: T, message: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            error: None,
            message: Some(message.into()),
            request_id: request_id.0,
            timestamp: Utc::now(),
        }
    }
}

/// An error ready to be rendered: a stable code plus a user-visible message
/// carrying the request id for server-side correlation.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: RequestId,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            code,
            message: message.into(),
            request_id,
        }
    }

    pub fn from_store(err: StoreError, request_id: RequestId) -> Self {
        Self::new(err.code(), err.to_string(), request_id)
    }

    pub fn from_engine(err: EngineError, request_id: RequestId) -> Self {
        Self::new(err.code(), err.to_string(), request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = Envelope::<()> {
            data: None,
            error: Some(format!("{}: {}", self.code, self.message)),
            message: None,
            request_id: self.request_id.0,
            timestamp: Utc::now(),
        };
        (status, Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_empty_fields() {
        let envelope = Envelope::data(RequestId(Uuid::new_v4()), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"data\""));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"request_id\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn error_envelope_carries_code_and_request_id() {
        let id = RequestId(Uuid::new_v4());
        let err = ApiError::new(ErrorCode::NotFound, "network corp-lan", id);
        let envelope = Envelope::<()> {
            data: None,
            error: Some(format!("{}: {}", err.code, err.message)),
            message: None,
            request_id: err.request_id.0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("not_found: network corp-lan"));
        assert!(json.contains(&id.0.to_string()));
    }
}
