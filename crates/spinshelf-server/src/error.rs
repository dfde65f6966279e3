//! HTTP-facing error type.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use spinshelf_spotify::UpstreamError;

use crate::cache::UnknownTag;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or wrong administrator identity (401).
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// Malformed request (400).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Failure talking to the upstream music API.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Upstream(err) => match err {
                UpstreamError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                UpstreamError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
                UpstreamError::Auth { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_auth"),
                UpstreamError::RateLimited { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "rate_limited")
                }
                UpstreamError::Unavailable { .. }
                | UpstreamError::Transport(_)
                | UpstreamError::Decode(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            },
        }
    }
}

impl From<UnknownTag> for ApiError {
    fn from(err: UnknownTag) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY => {
                tracing::error!(error = %self, "request failed");
            }
            _ => tracing::debug!(error = %self, status = status.as_u16(), "request rejected"),
        }

        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));
        let mut response = (status, body).into_response();

        match &self {
            Self::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("X-Admin-Identity"),
                );
            }
            Self::Upstream(UpstreamError::RateLimited { retry_after_secs }) => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (UpstreamError::auth("x").into(), StatusCode::INTERNAL_SERVER_ERROR),
            (UpstreamError::NotFound("x".into()).into(), StatusCode::NOT_FOUND),
            (UpstreamError::BadRequest("x".into()).into(), StatusCode::BAD_REQUEST),
            (UpstreamError::unavailable(500, "x").into(), StatusCode::BAD_GATEWAY),
            (UpstreamError::Transport("x".into()).into(), StatusCode::BAD_GATEWAY),
            (UpstreamError::Decode("x".into()).into(), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_unauthorized_sets_challenge() {
        let response = ApiError::Unauthorized("missing".into()).into_response();
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let err: ApiError = UpstreamError::RateLimited {
            retry_after_secs: 120,
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "120");
    }

    #[test]
    fn test_unknown_tag_is_bad_request() {
        let err: ApiError = UnknownTag("nope".into()).into();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.contains("nope")));
    }
}
