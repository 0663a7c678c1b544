use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::session_store::SignInError;
use crate::saml::SamlError;

/// Errors surfaced by the SAML HTTP endpoints.
///
/// Responses carry a generic message only; the detail goes to the server log.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Saml(#[from] SamlError),

    #[error(transparent)]
    SignIn(#[from] SignInError),

    /// No session cookie, or the session is gone
    #[error("Session not found")]
    SessionNotFound,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match &self {
            AuthError::Saml(e) if e.is_metadata_error() => {
                tracing::error!(kind = e.kind(), error = %e, "Identity provider unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "idp_unavailable",
                    "Identity provider is unavailable",
                )
            }
            AuthError::Saml(SamlError::Encoding(detail)) => {
                tracing::error!(error = %detail, "Failed to encode SAML message");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal_error",
                    "Internal server error",
                )
            }
            AuthError::Saml(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "SAML login failed");
                (
                    StatusCode::UNAUTHORIZED,
                    "authentication_error",
                    "saml_login_failed",
                    "SAML authentication failed",
                )
            }
            AuthError::SignIn(SignInError::Storage(detail)) => {
                tracing::error!(error = %detail, "Session storage failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal_error",
                    "Internal server error",
                )
            }
            AuthError::SignIn(SignInError::Expired) => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_expired",
                "Session has expired",
            ),
            AuthError::SignIn(SignInError::NotFound) | AuthError::SessionNotFound => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "session_not_found",
                "Session not found",
            ),
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}

/// Standard error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type classification (e.g., "authentication_error")
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    /// Machine-readable error code
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                code: Some(code.into()),
            },
        }
    }
}
