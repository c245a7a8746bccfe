//! Price table: last known price per asset symbol.
//!
//! Read-mostly map behind a `tokio::sync::RwLock`. Updates overwrite in place and
//! no history is kept. The liquidation monitor evaluates a whole sweep against one
//! [`PriceSnapshot`] so concurrent updates cannot change decisions mid-sweep.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use scos_common::error::AppError;
use scos_common::types::PriceEntry;

/// Immutable point-in-time copy of the price table.
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    prices: HashMap<String, PriceEntry>,
}

impl PriceSnapshot {
    pub fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).map(|entry| entry.price)
    }

    pub fn entry(&self, symbol: &str) -> Option<&PriceEntry> {
        self.prices.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Entries sorted by symbol.
    pub fn entries(&self) -> Vec<(String, PriceEntry)> {
        let mut entries: Vec<_> = self
            .prices
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), *entry))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Concurrent symbol → price store.
#[derive(Debug, Default)]
pub struct PriceTable {
    prices: RwLock<HashMap<String, PriceEntry>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table pre-populated with `(symbol, price)` pairs.
    pub fn with_prices(
        prices: impl IntoIterator<Item = (String, Decimal)>,
    ) -> Result<Self, AppError> {
        let now = Utc::now();
        let mut map = HashMap::new();
        for (symbol, price) in prices {
            validate(&symbol, price)?;
            map.insert(symbol, PriceEntry { price, updated_at: now });
        }
        Ok(Self {
            prices: RwLock::new(map),
        })
    }

    /// Overwrite the price for `symbol`. Negative prices are rejected.
    pub async fn set(&self, symbol: &str, price: Decimal) -> Result<PriceEntry, AppError> {
        validate(symbol, price)?;

        let entry = PriceEntry {
            price,
            updated_at: Utc::now(),
        };
        self.prices.write().await.insert(symbol.to_string(), entry);

        tracing::debug!(symbol, %price, "Price updated");
        Ok(entry)
    }

    /// Last price set for `symbol`, or `None` if it was never set.
    pub async fn get(&self, symbol: &str) -> Option<PriceEntry> {
        self.prices.read().await.get(symbol).copied()
    }

    /// Add `delta` to an existing price, clamping the result at zero.
    pub async fn adjust(&self, symbol: &str, delta: Decimal) -> Result<PriceEntry, AppError> {
        let mut prices = self.prices.write().await;
        let entry = prices
            .get_mut(symbol)
            .ok_or_else(|| AppError::PriceUnavailable(symbol.to_string()))?;

        let adjusted = entry.price.checked_add(delta).ok_or_else(|| {
            AppError::ArithmeticOverflow(format!("{} + {} for {}", entry.price, delta, symbol))
        })?;
        entry.price = adjusted.max(Decimal::ZERO);
        entry.updated_at = Utc::now();

        Ok(*entry)
    }

    pub async fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            prices: self.prices.read().await.clone(),
        }
    }
}

fn validate(symbol: &str, price: Decimal) -> Result<(), AppError> {
    if symbol.trim().is_empty() {
        return Err(AppError::InvalidInput("symbol must not be empty".to_string()));
    }
    if price.is_sign_negative() && !price.is_zero() {
        return Err(AppError::InvalidPrice {
            symbol: symbol.to_string(),
            reason: format!("price must not be negative, got {}", price),
        });
    }
    Ok(())
}
