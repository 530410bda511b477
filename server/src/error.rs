//! HTTP error responses.
//!
//! [`AppError`] bridges [`BookingError`] and HTTP: it carries a status, a
//! stable machine-readable `code` and a message, and renders as
//! `{"error": message, "code": code}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxoffice_core::error::{BookingError, StoreError};
use serde::Serialize;
use std::fmt;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// 422 Unprocessable Entity.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "INTERNAL_SERVER_ERROR")
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message, "SERVICE_UNAVAILABLE")
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(status = %self.status, code = %self.code, message = %self.message, "Request failed");
            }
        }

        let body = ErrorResponse {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound(what) => Self::not_found(format!("{what} not found")),
            BookingError::Conflict(reason) => {
                Self::new(StatusCode::CONFLICT, reason.message(), reason.code())
            },
            BookingError::Invalid(message) => Self::validation(message),
            BookingError::Unavailable(_) => {
                Self::unavailable("a dependency is unavailable, try again")
                    .with_source(anyhow::Error::new(err))
            },
            BookingError::Storage(_) => {
                Self::internal("an internal error occurred").with_source(anyhow::Error::new(err))
            },
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::internal("an internal error occurred").with_source(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::error::ConflictReason;

    #[test]
    fn conflicts_keep_their_reason_code() {
        let err = AppError::from(BookingError::Conflict(ConflictReason::SeatContention));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "SEAT_CONTENTION");

        let err = AppError::from(BookingError::Conflict(ConflictReason::Expired));
        assert_eq!(err.code(), "RESERVATION_EXPIRED");
    }

    #[test]
    fn booking_errors_map_to_statuses() {
        let cases = [
            (BookingError::NotFound("session 9".into()), StatusCode::NOT_FOUND),
            (BookingError::Invalid("no seats".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (BookingError::Unavailable("redis down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (BookingError::Storage("deadlock".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::from(BookingError::Storage("password=hunter2".into()));
        assert_eq!(err.to_string(), "[INTERNAL_SERVER_ERROR] an internal error occurred");
    }
}
