//! Error types for the strategy execution engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors
///
/// The taxonomy mirrors how failures are handled: validation errors are
/// rejected before any side effect and never retried, execution errors are
/// recorded per trade without aborting sibling strategies, upstream errors
/// degrade gracefully, and persistence errors always surface to the caller.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Database / ledger error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed signal, address, percentage or action
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Trade execution failure (swap failed, insufficient balance, partial fill)
    #[error("Execution error: {0}")]
    Execution(String),

    /// Upstream collaborator unavailable (valuation oracle, swap gateway, price feed)
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Chain RPC error
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Ledger write failure; holdings state must remain authoritative
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response envelope for the trigger API: `{error, message}`
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl AppError {
    /// Short machine-readable code used in the API envelope
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "configuration_error",
            AppError::Database(_) => "database_error",
            AppError::Validation(_) => "validation_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Execution(_) => "execution_failed",
            AppError::Upstream(_) => "upstream_unavailable",
            AppError::Rpc(_) => "rpc_error",
            AppError::Persistence(_) => "persistence_failed",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) | AppError::Rpc(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Execution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
        };

        tracing::error!(
            error_type = %self,
            status_code = %status_code,
            "Request error"
        );

        (status_code, Json(json!(body))).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err = AppError::Validation("percentage out of range".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "validation_failed");
    }

    #[test]
    fn test_upstream_maps_to_unavailable() {
        let err = AppError::Upstream("valuation service timeout".to_string());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
