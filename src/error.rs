// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::DayKind;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// The day-ledger write did not succeed; counters were not touched.
    #[error("Ledger write failed: {0}")]
    LedgerWriteFailed(String),

    /// The ledger was written but the user counters were not.
    /// The next finalize or sweep reconciles them from the ledger.
    #[error("Counter update failed: {0}")]
    CounterUpdateFailed(String),

    /// A freeze could not be recorded, so no token was spent.
    #[error("Freeze write failed, entitlement kept: {0}")]
    EntitlementConflict(String),

    /// The ledger already holds a different kind for the day.
    #[error("Day {day} is already recorded as {}", .existing.as_str())]
    DayConflict { day: NaiveDate, existing: DayKind },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// Whether the caller may simply retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LedgerWriteFailed(_)
                | AppError::CounterUpdateFailed(_)
                | AppError::EntitlementConflict(_)
                | AppError::Database(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::UserNotFound(msg) => {
                (StatusCode::NOT_FOUND, "user_not_found", Some(msg.clone()))
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::DayConflict { .. } => {
                (StatusCode::CONFLICT, "day_conflict", Some(self.to_string()))
            }
            AppError::LedgerWriteFailed(msg) => {
                tracing::error!(error = %msg, "Ledger write failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "ledger_write_failed", None)
            }
            AppError::CounterUpdateFailed(msg) => {
                tracing::error!(error = %msg, "Counter update failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "counter_update_failed", None)
            }
            AppError::EntitlementConflict(msg) => {
                tracing::error!(error = %msg, "Entitlement conflict");
                (StatusCode::INTERNAL_SERVER_ERROR, "entitlement_conflict", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
