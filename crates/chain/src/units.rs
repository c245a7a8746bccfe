//! Conversion of decimal amounts to on-chain fixed-point integers.

use alloy::primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Decimals used by the vault for collateral and SCOS amounts.
pub const AMOUNT_DECIMALS: u32 = 6;

/// Decimals used by the vault for prices.
pub const PRICE_DECIMALS: u32 = 18;

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("negative value {0} cannot be represented on chain")]
    Negative(Decimal),

    #[error("value {0} overflows uint256 at {1} decimals")]
    Overflow(Decimal, u32),
}

/// Scale `value` to an integer with `decimals` fractional digits.
///
/// Digits beyond `decimals` are truncated.
pub fn to_units(value: Decimal, decimals: u32) -> Result<U256, UnitError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(UnitError::Negative(value));
    }

    let truncated = value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    let mantissa = U256::from(truncated.mantissa().unsigned_abs());
    let shift = decimals.saturating_sub(truncated.scale());

    U256::from(10u64)
        .checked_pow(U256::from(shift))
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or(UnitError::Overflow(value, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_scaling() {
        assert_eq!(
            to_units(dec!(1428.571428), AMOUNT_DECIMALS).unwrap(),
            U256::from(1_428_571_428u64)
        );
        assert_eq!(to_units(dec!(20), AMOUNT_DECIMALS).unwrap(), U256::from(20_000_000u64));
    }

    #[test]
    fn test_extra_digits_truncated() {
        assert_eq!(
            to_units(dec!(0.0000019), AMOUNT_DECIMALS).unwrap(),
            U256::from(1u64)
        );
    }

    #[test]
    fn test_price_scaling() {
        let expected = U256::from(3000u64) * U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(to_units(dec!(3000), PRICE_DECIMALS).unwrap(), expected);
        assert_eq!(
            to_units(dec!(0.5), PRICE_DECIMALS).unwrap(),
            U256::from(500_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_zero_and_negative() {
        assert_eq!(to_units(Decimal::ZERO, PRICE_DECIMALS).unwrap(), U256::ZERO);
        assert_eq!(
            to_units(dec!(-1), AMOUNT_DECIMALS),
            Err(UnitError::Negative(dec!(-1)))
        );
    }

    #[test]
    fn test_large_value_does_not_overflow_decimal() {
        // Decimal::MAX * 10^18 exceeds Decimal but fits in uint256.
        let units = to_units(Decimal::MAX, PRICE_DECIMALS).unwrap();
        assert!(units > U256::from(u128::MAX));
    }
}
