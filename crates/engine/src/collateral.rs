//! Collateral engine: borrow sizing and liquidation test.
//!
//! Pure functions over `Decimal`; no I/O and no shared state.
//!
//! borrowed = collateral × price ÷ collateral_ratio
//! drop     = (entry_price − current_price) ÷ entry_price
//!
//! A position is liquidatable when `drop` strictly exceeds the drop threshold.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use scos_common::error::AppError;

/// Decimal places kept on borrowed SCOS amounts (SCOS has 6 decimals).
pub const BORROW_SCALE: u32 = 6;

/// Default collateralization ratio (140%).
pub const DEFAULT_COLLATERAL_RATIO: Decimal = dec!(1.4);

/// Default liquidation threshold (a price drop of more than 25%).
pub const DEFAULT_DROP_THRESHOLD: Decimal = dec!(0.25);

/// Ratio and threshold applied to every position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollateralParams {
    pub collateral_ratio: Decimal,
    pub drop_threshold: Decimal,
}

impl Default for CollateralParams {
    fn default() -> Self {
        Self {
            collateral_ratio: DEFAULT_COLLATERAL_RATIO,
            drop_threshold: DEFAULT_DROP_THRESHOLD,
        }
    }
}

/// Compute the SCOS amount lent against `collateral_amount` units priced at `asset_price`.
///
/// The exact quotient is truncated toward zero to [`BORROW_SCALE`] places, so the
/// protocol never lends more than the collateral supports.
pub fn compute_borrow_amount(
    collateral_amount: Decimal,
    asset_price: Decimal,
    collateral_ratio: Decimal,
) -> Result<Decimal, AppError> {
    if collateral_ratio <= Decimal::ONE {
        return Err(AppError::InvalidInput(format!(
            "collateral ratio must be greater than 1, got {}",
            collateral_ratio
        )));
    }
    if collateral_amount.is_sign_negative() || asset_price.is_sign_negative() {
        return Err(AppError::InvalidInput(
            "collateral amount and price must not be negative".to_string(),
        ));
    }

    let value = collateral_amount.checked_mul(asset_price).ok_or_else(|| {
        AppError::ArithmeticOverflow(format!(
            "{} * {} exceeds the representable range",
            collateral_amount, asset_price
        ))
    })?;
    let borrowed = value.checked_div(collateral_ratio).ok_or_else(|| {
        AppError::ArithmeticOverflow(format!(
            "{} / {} exceeds the representable range",
            value, collateral_ratio
        ))
    })?;

    Ok(borrowed.round_dp_with_strategy(BORROW_SCALE, RoundingStrategy::ToZero))
}

/// Fractional drop from `entry_price` to `current_price`; `None` when the entry
/// price is not positive.
///
/// A price increase yields a negative drop.
pub fn price_drop(entry_price: Decimal, current_price: Decimal) -> Option<Decimal> {
    if entry_price <= Decimal::ZERO {
        return None;
    }
    (entry_price - current_price).checked_div(entry_price)
}

/// Whether a position opened at `entry_price` must be liquidated at `current_price`.
///
/// A zero entry price is never liquidatable.
pub fn is_liquidatable(
    entry_price: Decimal,
    current_price: Decimal,
    drop_threshold: Decimal,
) -> bool {
    price_drop(entry_price, current_price).is_some_and(|drop| drop > drop_threshold)
}
