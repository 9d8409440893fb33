//! Fiat to base-asset conversion and per-allocation splitting.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::SwapError;

/// Decimal places of the base asset's smallest unit
pub const NATIVE_DECIMALS: u32 = 18;

fn proportion_decimal(proportion: f64) -> Result<Decimal, SwapError> {
    if !proportion.is_finite() || !(0.0..=1.0).contains(&proportion) {
        return Err(SwapError::Pricing(format!("proportion {proportion} is outside [0, 1]")));
    }
    // binary float noise sits far below 12 places
    Decimal::from_f64(proportion)
        .map(|p| p.round_dp(12))
        .ok_or_else(|| SwapError::Pricing(format!("proportion {proportion} is not representable")))
}

/// Convert a deposit in fiat cents into smallest native units at `usd_price`.
///
/// The native amount is rounded to 18 places (half away from zero) before it
/// is scaled to an integer.
pub fn cents_to_native_units(deposit_cents: u64, usd_price: Decimal) -> Result<u128, SwapError> {
    if usd_price <= Decimal::ZERO {
        return Err(SwapError::Pricing(format!("non-positive native price {usd_price}")));
    }

    let dollars = Decimal::from(deposit_cents) / Decimal::ONE_HUNDRED;
    let native = dollars
        .checked_div(usd_price)
        .ok_or_else(|| SwapError::Pricing("deposit is too large to convert".to_string()))?
        .round_dp_with_strategy(NATIVE_DECIMALS, RoundingStrategy::MidpointAwayFromZero);

    native
        .checked_mul(Decimal::from(10u64.pow(NATIVE_DECIMALS)))
        .and_then(|units| units.trunc().to_u128())
        .ok_or_else(|| SwapError::Pricing(format!("{native} does not fit in native units")))
}

/// `floor(total * proportion)`, never more than what is still unallocated
pub fn split_allocation(total: u128, proportion: f64, remaining: u128) -> Result<u128, SwapError> {
    let proportion = proportion_decimal(proportion)?;
    let total = Decimal::from_u128(total)
        .ok_or_else(|| SwapError::Pricing(format!("total {total} does not fit in a decimal")))?;

    let share = total
        .checked_mul(proportion)
        .and_then(|share| share.floor().to_u128())
        .ok_or_else(|| SwapError::Pricing("allocation share overflowed".to_string()))?;

    Ok(share.min(remaining))
}

/// Fiat cents attributed to one allocation: `ceil(proportion * deposit_cents)`
pub fn record_amount(proportion: f64, deposit_cents: u64) -> Result<u64, SwapError> {
    let proportion = proportion_decimal(proportion)?;
    (proportion * Decimal::from(deposit_cents))
        .ceil()
        .to_u64()
        .ok_or_else(|| SwapError::Pricing("record amount overflowed".to_string()))
}
