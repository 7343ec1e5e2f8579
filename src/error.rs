use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::{auth::repo::StoreError, mail::MailError};

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures surfaced by the identity and session operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    /// Authenticated, but not the owner of the resource.
    #[error("{0}")]
    Forbidden(String),
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Invalid or expired verification code")]
    InvalidCode,
    #[error("Too many attempts. Please wait 5 minutes before trying again")]
    RateLimited,
    #[error("{0}")]
    Validation(String),
    /// Email delivery or storage failure. The detail is logged, never returned.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl AuthError {
    /// Machine-readable error code returned to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Conflict(_) => "conflict",
            AuthError::NotFound(_) => "not_found",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidCode => "invalid_code",
            AuthError::RateLimited => "rate_limited",
            AuthError::Validation(_) => "validation",
            AuthError::Upstream(_) => "upstream_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Unauthorized(_) | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::InvalidCode | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            AuthError::Upstream(_) => "Request could not be completed, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AuthError::Upstream(detail) = &self {
            error!(error = %detail, "upstream failure");
        }
        let body = json!({
            "error": self.kind(),
            "message": self.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => AuthError::Conflict(match field.as_str() {
                "email" => "Email already registered".to_string(),
                "username" => "Username already taken".to_string(),
                other => format!("{} already in use", other),
            }),
            StoreError::NotFound => AuthError::NotFound("Record not found".into()),
            other => AuthError::Upstream(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                "Expected request with `Content-Type: application/json`".to_string()
            }
            JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON".to_string(),
            other => other.body_text(),
        };
        AuthError::Validation(message)
    }
}

impl From<MailError> for AuthError {
    fn from(e: MailError) -> Self {
        AuthError::Upstream(e.to_string())
    }
}
