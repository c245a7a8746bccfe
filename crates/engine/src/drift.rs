//! Price drift simulator.
//!
//! Nudges one symbol's price by a fixed delta on a fixed period. Only used in
//! demo deployments to walk a price down into liquidation territory.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::price_table::PriceTable;

pub struct PriceDrift {
    prices: Arc<PriceTable>,
    symbol: String,
    delta: Decimal,
    period: Duration,
}

impl PriceDrift {
    pub fn new(prices: Arc<PriceTable>, symbol: String, delta: Decimal, period: Duration) -> Self {
        Self {
            prices,
            symbol,
            delta,
            period,
        }
    }

    /// Apply the delta every period until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        // The first tick completes immediately; skip it so the seed price survives one period.
        ticker.tick().await;

        tracing::info!(
            symbol = %self.symbol,
            delta = %self.delta,
            period_secs = self.period.as_secs(),
            "Price drift started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.prices.adjust(&self.symbol, self.delta).await {
                        Ok(entry) => tracing::debug!(
                            symbol = %self.symbol,
                            price = %entry.price,
                            "Price drifted"
                        ),
                        Err(e) => tracing::warn!(
                            symbol = %self.symbol,
                            error = %e,
                            "Price drift skipped"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
