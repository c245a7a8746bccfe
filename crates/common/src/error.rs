use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::types::{PositionId, PositionKey, PositionStatus};

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid price for {symbol}: {reason}")]
    InvalidPrice { symbol: String, reason: String },

    #[error("No price available for {0}")]
    PriceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("An active position already exists for {0}")]
    DuplicateActivePosition(PositionKey),

    #[error("Position {id} is {actual}, expected {expected}")]
    StaleState {
        id: PositionId,
        expected: PositionStatus,
        actual: PositionStatus,
    },

    #[error("Position {0} was liquidated before the redemption could be recorded")]
    ConflictingLiquidation(PositionId),

    #[error("Arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) | AppError::InvalidPrice { .. } => StatusCode::BAD_REQUEST,
            AppError::PriceUnavailable(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateActivePosition(_)
            | AppError::StaleState { .. }
            | AppError::ConflictingLiquidation(_) => StatusCode::CONFLICT,
            AppError::SubmissionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::ArithmeticOverflow(_)
            | AppError::InconsistentState(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Don't leak driver details to clients
            AppError::Database(_) => "Database error".to_string(),
            _ => self.to_string(),
        };

        let body = json!({ "success": false, "message": message });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_signals_map_to_conflict() {
        let key = PositionKey::new("0xabc", "APPLE", "reddio");
        assert_eq!(
            AppError::DuplicateActivePosition(key).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::StaleState {
                id: 1,
                expected: PositionStatus::Active,
                actual: PositionStatus::Liquidated,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ConflictingLiquidation(1).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_submission_failure_is_bad_gateway() {
        let err = AppError::SubmissionFailed("timed out".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_string(), "Submission failed: timed out");
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(
            AppError::InvalidInput("amount".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::PriceUnavailable("APPLE".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InconsistentState("orphaned".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
