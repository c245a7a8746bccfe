//! Shared application state for the Axum API server.

use std::sync::Arc;

use scos_common::config::AppConfig;
use scos_engine::price_table::PriceTable;
use scos_engine::service::PositionService;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PositionService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(service: Arc<PositionService>, config: AppConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }

    pub fn prices(&self) -> &Arc<PriceTable> {
        self.service.prices()
    }
}
