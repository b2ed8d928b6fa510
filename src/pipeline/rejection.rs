//! Terminal failures of an authentication stage.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::cert::ChainError;
use crate::signature::SignatureError;
use crate::token::TokenError;

/// An HTTP status plus a short machine code and human-readable reason.
///
/// Rendered as `{"error": "<code>", "message": "<reason>"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    status: StatusCode,
    error: &'static str,
    message: String,
}

impl AuthRejection {
    /// Build a rejection.
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    /// 400 for a missing or malformed required field.
    pub fn bad_request(error: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, message)
    }

    /// 401 for failed verification.
    pub fn unauthorized(error: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error, message)
    }

    /// 403 for an authenticated caller lacking scopes.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "insufficient_scope", message)
    }

    /// HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn error(&self) -> &'static str {
        self.error
    }

    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.error, self.message)
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.error,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

impl From<ChainError> for AuthRejection {
    fn from(err: ChainError) -> Self {
        Self::unauthorized("invalid_certificate", err.to_string())
    }
}

impl From<SignatureError> for AuthRejection {
    fn from(err: SignatureError) -> Self {
        let message = err.to_string();
        match err {
            SignatureError::MissingTimestamp | SignatureError::MalformedTimestamp(_) => {
                Self::bad_request("invalid_timestamp", message)
            }
            SignatureError::TimestampOutOfWindow { .. } => {
                Self::bad_request("expired_timestamp", message)
            }
            SignatureError::Decode(_) | SignatureError::Mismatch => {
                Self::unauthorized("invalid_signature", message)
            }
            SignatureError::MissingNonce => Self::bad_request("invalid_nonce", message),
            SignatureError::NonceReused => Self::unauthorized("replayed_request", message),
            SignatureError::NonceCacheFull => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "replay_cache_full", message)
            }
            SignatureError::BodyTooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large", message)
            }
            SignatureError::Body(_) => Self::bad_request("invalid_body", message),
            SignatureError::Key(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

impl From<TokenError> for AuthRejection {
    fn from(err: TokenError) -> Self {
        Self::unauthorized("invalid_token", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_problems_are_bad_requests() {
        for err in [
            SignatureError::MissingTimestamp,
            SignatureError::MalformedTimestamp("x".into()),
            SignatureError::TimestampOutOfWindow { skew: 601 },
        ] {
            assert_eq!(AuthRejection::from(err).status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn verification_failures_are_unauthorized() {
        assert_eq!(
            AuthRejection::from(SignatureError::Mismatch).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(SignatureError::NonceReused).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(ChainError::UnknownIssuer).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthRejection::from(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn full_nonce_cache_is_unavailable() {
        assert_eq!(
            AuthRejection::from(SignatureError::NonceCacheFull).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn body_problems_split_by_cause() {
        let too_large = AuthRejection::from(SignatureError::BodyTooLarge { limit: 16 });
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let broken = AuthRejection::from(SignatureError::Body("connection reset".into()));
        assert_eq!(broken.status(), StatusCode::BAD_REQUEST);
        assert_eq!(broken.error(), "invalid_body");
    }

    #[test]
    fn missing_nonce_is_bad_request() {
        let rejection = AuthRejection::from(SignatureError::MissingNonce);
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejection.error(), "invalid_nonce");
    }

    #[tokio::test]
    async fn response_body_is_json_error() {
        // GIVEN: a forbidden rejection
        let response = AuthRejection::forbidden("missing scope carol.admin").into_response();
        // THEN: status and body match
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "insufficient_scope");
        assert_eq!(json["message"], "missing scope carol.admin");
    }
}
