use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::SamlError;

/// Error response body.
///
/// Format: `{"error": {"type": "...", "message": "...", "code": ...}}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error type classification (e.g., "authentication_error", "invalid_request_error")
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable error code (null if not applicable)
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

impl IntoResponse for SamlError {
    fn into_response(self) -> Response {
        // The reason a response was rejected goes to the logs only
        let (status, error_type, code, message) = if self.is_authentication_failure() {
            tracing::warn!(kind = self.kind(), error = %self, "SAML authentication failed");
            (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "authentication_failed",
                "Authentication failed",
            )
        } else {
            match &self {
                SamlError::NotYetAuthenticated => (
                    StatusCode::UNAUTHORIZED,
                    "authentication_error",
                    "not_yet_authenticated",
                    "Login has not completed",
                ),
                SamlError::Session(_) | SamlError::UnknownServiceProvider(_) => {
                    tracing::warn!(kind = self.kind(), error = %self, "Rejected SAML login session");
                    (
                        StatusCode::BAD_REQUEST,
                        "invalid_request_error",
                        "invalid_session",
                        "Invalid or expired login session",
                    )
                }
                _ => {
                    tracing::error!(kind = self.kind(), error = %self, "SAML request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "internal_error",
                        "Internal server error",
                    )
                }
            }
        };

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}
