use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settlement races and ownership violations. Both leave the ledger
/// unchanged; the caller must re-select entries and retry explicitly.
#[derive(Error, Debug)]
pub enum ConflictError {
    #[error("ledger entry {entry_id} is already settled")]
    AlreadySettled { entry_id: Uuid },

    #[error("ledger entry {entry_id} does not belong to driver {driver_id}")]
    DriverMismatch { entry_id: Uuid, driver_id: String },
}

/// A settlement amount that does not match the sum of the entries it covers.
#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("settlement amount {declared} does not match entry sum {expected}")]
    AmountMismatch { declared: Decimal, expected: Decimal },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, details) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Conflict(ConflictError::AlreadySettled { entry_id }) => (
                StatusCode::CONFLICT,
                self.to_string(),
                Some(serde_json::json!({ "entryId": entry_id })),
            ),
            AppError::Conflict(ConflictError::DriverMismatch { entry_id, driver_id }) => (
                StatusCode::CONFLICT,
                self.to_string(),
                Some(serde_json::json!({
                    "entryId": entry_id,
                    "driverId": driver_id,
                })),
            ),
            AppError::Reconciliation(ReconciliationError::AmountMismatch {
                declared,
                expected,
            }) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                Some(serde_json::json!({
                    "declaredAmount": declared,
                    "expectedAmount": expected,
                })),
            ),
            AppError::Database(err) => {
                error!("Database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::Config(_) | AppError::Internal(_) => {
                error!("Internal error: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::Validation(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .into_iter()
            .map(|(field, errors)| {
                let error_messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "invalid value".to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        AppError::Validation(message)
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
