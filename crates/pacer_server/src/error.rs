//! Translation of terminal failures into HTTP responses.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use pacer_error::{
    ChunkErrorKind, PacerError, PacerErrorKind, RateLimitErrorKind, UpstreamErrorKind,
};
use pacer_rate_limit::HEADER_RESET;
use serde_json::{Value, json};
use tracing::{error, warn};

/// A [`PacerError`] on its way to the caller.
#[derive(Debug)]
pub struct ApiError(PacerError);

impl ApiError {
    /// The wrapped error.
    pub fn inner(&self) -> &PacerError {
        &self.0
    }
}

impl From<PacerError> for ApiError {
    fn from(err: PacerError) -> Self {
        Self(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();

        let (status, body) = match self.0.kind() {
            PacerErrorKind::RateLimit(e) => {
                if let Some(reset) = e.kind.reset_at() {
                    headers.insert(HEADER_RESET, HeaderValue::from(reset));
                }
                let (code, retries) = match &e.kind {
                    RateLimitErrorKind::LimitExceeded { .. } => ("rate_limit_exceeded", None),
                    RateLimitErrorKind::RetriesExhausted { retries, .. } => {
                        ("retries_exhausted", Some(*retries))
                    }
                };
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    json!({
                        "error": code,
                        "message": e.kind.to_string(),
                        "reason": e.kind.reason(),
                        "reset_at": e.kind.reset_at(),
                        "retries": retries,
                    }),
                )
            }
            PacerErrorKind::Upstream(e) => match &e.kind {
                UpstreamErrorKind::Unauthorized(message) => {
                    (StatusCode::UNAUTHORIZED, error_body("unauthorized", message))
                }
                UpstreamErrorKind::MalformedPayload(message) => {
                    (StatusCode::BAD_GATEWAY, error_body("malformed_payload", message))
                }
                UpstreamErrorKind::Transient(message) => {
                    (StatusCode::BAD_GATEWAY, error_body("upstream_unavailable", message))
                }
                UpstreamErrorKind::Status { status, message } => (
                    StatusCode::BAD_GATEWAY,
                    json!({
                        "error": "upstream_error",
                        "message": message,
                        "status": status,
                    }),
                ),
            },
            PacerErrorKind::Chunk(e) => match &e.kind {
                ChunkErrorKind::Failed {
                    index,
                    total,
                    status,
                    resource_id,
                    message,
                } => (
                    StatusCode::BAD_GATEWAY,
                    json!({
                        "error": "chunk_failed",
                        "message": message,
                        "chunk": index,
                        "total": total,
                        "status": status,
                        "resource_id": resource_id,
                    }),
                ),
                ChunkErrorKind::InvalidChunkSize => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("misconfigured", &e.kind.to_string()),
                ),
            },
            PacerErrorKind::Request(e) => {
                (StatusCode::BAD_REQUEST, error_body("bad_request", &e.message))
            }
            PacerErrorKind::Json(e) => {
                (StatusCode::BAD_GATEWAY, error_body("malformed_payload", &e.message))
            }
            PacerErrorKind::Config(_) | PacerErrorKind::Storage(_) | PacerErrorKind::Server(_) => {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("internal", "Internal server error"),
                )
            }
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request failed");
        }

        (status, headers, Json(body)).into_response()
    }
}

fn error_body(code: &str, message: &str) -> Value {
    json!({ "error": code, "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_error::{RateLimitError, RateLimitReason, RequestError, UpstreamError};

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(PacerError, StatusCode)> = vec![
            (
                RateLimitError::new(RateLimitErrorKind::RetriesExhausted {
                    retries: 3,
                    reason: RateLimitReason::Global,
                    reset_at: Some(1_700_000_000),
                })
                .into(),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                UpstreamError::new(UpstreamErrorKind::Unauthorized("no key".into())).into(),
                StatusCode::UNAUTHORIZED,
            ),
            (
                RequestError::new("no items").into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                UpstreamError::new(UpstreamErrorKind::Transient("reset".into())).into(),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_rate_limit_error_carries_reset_header() {
        let err: PacerError = RateLimitError::new(RateLimitErrorKind::LimitExceeded {
            reason: RateLimitReason::Bucket,
            reset_at: Some(1_700_000_123),
        })
        .into();

        let response = ApiError::from(err).into_response();

        assert_eq!(
            response
                .headers()
                .get(HEADER_RESET)
                .and_then(|v| v.to_str().ok()),
            Some("1700000123")
        );
    }
}
