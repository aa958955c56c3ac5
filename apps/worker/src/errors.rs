use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Error taxonomy shared by the record store, the collaborators and the HTTP layer.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    /// No matching record (an empty query result counts as one).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend unreachable or misconfigured (missing table, bad region, closed pool).
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Malformed query or other backend rejection.
    #[error("Query error: {0}")]
    Query(String),

    /// Transactional write rejected, usually a concurrent modification. Safe to retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A soft delete stopped between its snapshot and live-row writes. Updates keep
    /// failing until the delete is repeated.
    #[error("Delete pending: {0}")]
    DeletePending(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Render error: {0}")]
    Render(String),

    /// Object store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a queue message that failed with this error is worth redelivering.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Unavailable(_)
                | AppError::Conflict(_)
                | AppError::Storage(_)
                | AppError::Render(_)
                | AppError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_) => AppError::Unavailable(format!(
                "Connection error occurred, please check config (url, credentials, etc): {e}"
            )),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // undefined_table
                Some("42P01") => AppError::Unavailable(format!(
                    "Error on table, please check migrations to make sure it is created: {e}"
                )),
                // unique_violation, serialization_failure
                Some("23505") | Some("40001") => AppError::Conflict(e.to_string()),
                _ => AppError::Query(e.to_string()),
            },
            _ => AppError::Query(e.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            AppError::Unavailable(format!("Queue connection error: {e}"))
        } else {
            AppError::Internal(anyhow::anyhow!("Queue error: {e}"))
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::DeletePending(msg) => (
                StatusCode::CONFLICT,
                "DELETE_PENDING",
                format!("Finish the interrupted delete first: {msg}"),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                format!("Update failed, retry: {msg}"),
            ),
            AppError::Unavailable(msg) => {
                tracing::error!("Backend unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "A backing service is unavailable".to_string(),
                )
            }
            AppError::Query(msg) => {
                tracing::error!("Query error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "QUERY_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    "A record could not be decoded".to_string(),
                )
            }
            AppError::Render(msg) => {
                tracing::error!("Render error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "RENDER_ERROR",
                    "A rendering error occurred".to_string(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
