//! Price table and balance routes.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scos_common::error::AppError;
use scos_common::types::PriceEntry;
use scos_engine::service::UserSummary;

use crate::response::{ApiJson, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/stock/{symbol}/price",
            get(get_price).post(update_price),
        )
        .route("/api/stocks/prices", get(list_prices))
        .route("/api/user/{address}/scos", get(user_scos))
}

#[derive(Debug, Serialize)]
pub struct StockPrice {
    pub symbol: String,
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl StockPrice {
    fn new(symbol: String, entry: PriceEntry) -> Self {
        Self {
            symbol,
            price: entry.price,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StockPrices {
    pub stocks: Vec<StockPrice>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriceRequest {
    pub price: Decimal,
}

/// GET /api/stock/:symbol/price: Current price for a symbol.
async fn get_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<StockPrice>>, AppError> {
    let entry = state
        .prices()
        .get(&symbol)
        .await
        .ok_or_else(|| AppError::PriceUnavailable(symbol.clone()))?;
    Ok(ApiResponse::ok("Price found", StockPrice::new(symbol, entry)))
}

/// POST /api/stock/:symbol/price: Set the price for a symbol.
///
/// Takes effect from the next monitor sweep; existing positions keep their entry price.
async fn update_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    ApiJson(req): ApiJson<UpdatePriceRequest>,
) -> Result<Json<ApiResponse<StockPrice>>, AppError> {
    let entry = state.prices().set(&symbol, req.price).await?;
    tracing::info!(symbol = %symbol, price = %entry.price, "Price updated");
    Ok(ApiResponse::ok("Price updated", StockPrice::new(symbol, entry)))
}

/// GET /api/stocks/prices: Every known price, sorted by symbol.
async fn list_prices(State(state): State<AppState>) -> Json<ApiResponse<StockPrices>> {
    let stocks = state
        .prices()
        .snapshot()
        .await
        .entries()
        .into_iter()
        .map(|(symbol, entry)| StockPrice::new(symbol, entry))
        .collect();
    ApiResponse::ok("Prices found", StockPrices { stocks })
}

/// GET /api/user/:address/scos: SCOS borrowed across the user's active positions.
async fn user_scos(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<ApiResponse<UserSummary>> {
    let summary = state.service.user_summary(&address).await;
    ApiResponse::ok("Balance found", summary)
}
