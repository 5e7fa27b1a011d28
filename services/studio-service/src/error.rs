use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Route-level failure: the HTTP status plus the `{error, code}` body.
#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: message.into(),
                code,
            },
        }
    }

    pub fn auth_missing() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_missing", "missing bearer token")
    }

    pub fn auth_invalid() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "auth_invalid",
            "invalid or expired session",
        )
    }

    pub fn banned() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "user_banned",
            "this account has been disabled, contact an administrator",
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
    }

    /// Passes the provider's status through when it is an error status, else 500.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|status| status.is_client_error() || status.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, "upstream_error", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Lifts a store failure into a 500, logging the store's message.
pub fn store_failure(context: &'static str) -> impl FnOnce(String) -> ServiceError {
    move |err| {
        tracing::error!(error = %err, context, "store operation failed");
        ServiceError::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_keeps_error_statuses_and_rewrites_others() {
        assert_eq!(ServiceError::upstream(429, "slow").status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ServiceError::upstream(502, "bad").status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            ServiceError::upstream(200, "odd").status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_and_admin_failures_are_distinguishable() {
        let missing = ServiceError::auth_missing();
        let forbidden = ServiceError::forbidden("admins only");
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.body.code, "forbidden");
    }
}
