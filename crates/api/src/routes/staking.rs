//! Stake and redeem routes.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use scos_common::error::AppError;
use scos_engine::service::{RedeemReceipt, StakeParams, StakeReceipt};

use crate::response::{ApiJson, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stake", post(stake))
        .route("/api/redeem", post(redeem))
}

#[derive(Debug, Deserialize)]
pub struct StakeRequest {
    pub user_address: String,
    pub token_address: String,
    pub chain: String,
    pub amount: Decimal,
    pub stock_symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub user_address: String,
    pub token_address: String,
    pub chain: String,
}

/// POST /api/stake: Lock collateral and borrow SCOS at the current price.
async fn stake(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StakeRequest>,
) -> Result<Json<ApiResponse<StakeReceipt>>, AppError> {
    let params = StakeParams {
        user: req.user_address,
        asset: req.stock_symbol,
        token_address: req.token_address,
        network: req.chain,
        collateral_amount: req.amount,
    };

    let receipt = state.service.stake(&params).await?;
    Ok(ApiResponse::ok("Stake successful", receipt))
}

/// POST /api/redeem: Close the active position for a collateral token.
async fn redeem(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RedeemRequest>,
) -> Result<Json<ApiResponse<RedeemReceipt>>, AppError> {
    let receipt = state
        .service
        .redeem_by_token(&req.user_address, &req.token_address, &req.chain)
        .await?;
    Ok(ApiResponse::ok("Redeem successful", receipt))
}
