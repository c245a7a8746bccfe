pub mod health;
pub mod positions;
pub mod staking;
pub mod stocks;
pub mod trading;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(staking::router())
        .merge(stocks::router())
        .merge(positions::router())
        .merge(trading::router())
        .with_state(state)
}
