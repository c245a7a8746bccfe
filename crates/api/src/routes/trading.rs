//! Buy and sell order routes.
//!
//! Orders are only recorded in the audit trail; nothing is settled on chain.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use scos_common::error::AppError;
use scos_common::types::{TransactionKind, TransactionRecord};

use crate::response::{ApiJson, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/buy", post(buy))
        .route("/api/sell", post(sell))
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub user_address: String,
    pub token_address: String,
    pub chain: String,
    pub amount: Decimal,
}

/// POST /api/buy
async fn buy(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TradeRequest>,
) -> Result<Json<ApiResponse<TransactionRecord>>, AppError> {
    let record = record(&state, &req, TransactionKind::Buy)?;
    Ok(ApiResponse::ok("Buy order processed", record))
}

/// POST /api/sell
async fn sell(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TradeRequest>,
) -> Result<Json<ApiResponse<TransactionRecord>>, AppError> {
    let record = record(&state, &req, TransactionKind::Sell)?;
    Ok(ApiResponse::ok("Sell order processed", record))
}

fn record(
    state: &AppState,
    req: &TradeRequest,
    kind: TransactionKind,
) -> Result<TransactionRecord, AppError> {
    if req.token_address.trim().is_empty() {
        return Err(AppError::InvalidInput("token_address is required".to_string()));
    }
    if req.amount <= Decimal::ZERO {
        return Err(AppError::InvalidInput(format!(
            "amount must be positive, got {}",
            req.amount
        )));
    }
    state.service.record_trade(&req.user_address, &req.chain, kind)
}
