use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::infrastructure::middleware::request_id::current_request_id;

/// The error taxonomy shared by both services. Every variant belongs to exactly
/// one [`ErrorKind`], which decides how it is reported to clients and brokers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Message bus error: {0}")]
    Bus(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Undecodable message: {0}")]
    Poison(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthenticated,
    Transient,
    Poison,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Unauthorized(_) => ErrorKind::Unauthenticated,
            AppError::Database(_) | AppError::Cache(_) | AppError::Bus(_) | AppError::Timeout(_) => {
                ErrorKind::Transient
            }
            AppError::Poison(_) => ErrorKind::Poison,
            AppError::Configuration(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// HTTP status for the error. Conflicts are reported as 400.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::Poison => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Transient | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Poison => "Invalid request",
            ErrorKind::Conflict => "Precondition failed",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Unauthenticated => "Unauthorized",
            ErrorKind::Transient | ErrorKind::Internal => "Internal server error",
        }
    }

    fn detail(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Unauthorized(msg)
            | AppError::Poison(msg) => msg.clone(),
            // Downstream failures are logged, never echoed to the client.
            _ => "An unexpected error occurred while processing the request".to_string(),
        }
    }

    pub fn to_problem(&self) -> Problem {
        let status = self.status_code();
        Problem {
            problem_type: format!(
                "https://developer.mozilla.org/en-US/docs/Web/HTTP/Status/{}",
                status.as_u16()
            ),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: self.detail(),
            trace_id: current_request_id(),
        }
    }
}

/// RFC-7807 problem document.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::Transient | ErrorKind::Internal => {
                tracing::error!(error = %self, "request failed");
            }
            _ => tracing::debug!(error = %self, "request rejected"),
        }

        let problem = self.to_problem();
        let status = self.status_code();
        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<AppError> for tonic::Status {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        match err.status_code() {
            StatusCode::BAD_REQUEST => tonic::Status::invalid_argument(message),
            StatusCode::UNAUTHORIZED => tonic::Status::unauthenticated(message),
            StatusCode::NOT_FOUND => tonic::Status::not_found(message),
            StatusCode::INTERNAL_SERVER_ERROR => tonic::Status::internal(message),
            _ => tonic::Status::unknown(message),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => AppError::Timeout(err.to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
