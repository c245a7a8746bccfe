//! Position lookup routes.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use scos_common::error::AppError;
use scos_common::types::{Position, PositionKey};

use crate::response::ApiResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/position/{chain}/{user}/{symbol}", get(get_position))
}

/// GET /api/position/:chain/:user/:symbol: The user's active position for an asset.
async fn get_position(
    State(state): State<AppState>,
    Path((chain, user, symbol)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<Position>>, AppError> {
    let key = PositionKey::new(user, symbol, chain);
    let position = state.service.positions().find_active(&key).await?;
    Ok(ApiResponse::ok("Position found", position))
}
