//! Fixed-point helpers shared by every ledger conversion.
//!
//! All `a * b / c` products go through a 256-bit intermediate so that
//! WAD-scaled USD values multiplied by share supplies never overflow.
//! Callers always pick the rounding direction explicitly.

use alloy_primitives::U256;

use crate::error::{VaultError, VaultResult};

/// Basis-point denominator for allocations and fees.
pub const FULL_PERCENT: u128 = 10_000;

/// Denominator for signed yield percentages.
pub const YIELD_FULL_PERCENT: i128 = 1_000_000_000_000;

/// USD values and share prices are scaled by this.
pub const WAD: u128 = 1_000_000_000_000_000_000;

pub const SECONDS_PER_YEAR: u128 = 31_536_000;

/// Shares locked forever on the first mint of any share ledger.
pub const INITIAL_LOCKED_SHARES: u128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

fn to_u128(value: U256) -> VaultResult<u128> {
    u128::try_from(value).map_err(|_| VaultError::Overflow)
}

/// `a * b / denominator` with the requested rounding.
pub fn mul_div(a: u128, b: u128, denominator: u128, rounding: Rounding) -> VaultResult<u128> {
    if denominator == 0 {
        return Err(VaultError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    let d = U256::from(denominator);
    let mut quotient = product / d;
    if rounding == Rounding::Up && !(product % d).is_zero() {
        quotient += U256::from(1u8);
    }
    to_u128(quotient)
}

/// Floor variant used by every payout path.
pub fn mul_div_down(a: u128, b: u128, denominator: u128) -> VaultResult<u128> {
    mul_div(a, b, denominator, Rounding::Down)
}

/// Signed numerator, result truncated toward zero.
pub fn mul_div_signed(a: i128, b: u128, denominator: u128) -> VaultResult<i128> {
    let magnitude = mul_div_down(a.unsigned_abs(), b, denominator)?;
    let magnitude = i128::try_from(magnitude).map_err(|_| VaultError::Overflow)?;
    Ok(if a < 0 { -magnitude } else { magnitude })
}

/// `amount * bps / FULL_PERCENT`, rounded down.
pub fn bps_of(amount: u128, bps: u128) -> VaultResult<u128> {
    mul_div_down(amount, bps, FULL_PERCENT)
}

pub fn checked_add(a: u128, b: u128) -> VaultResult<u128> {
    a.checked_add(b).ok_or(VaultError::Overflow)
}

pub fn checked_sub(a: u128, b: u128) -> VaultResult<u128> {
    a.checked_sub(b).ok_or(VaultError::Overflow)
}

/// Element-wise sum of two equally sized asset vectors.
pub fn add_vec(a: &[u128], b: &[u128]) -> VaultResult<Vec<u128>> {
    a.iter().zip(b).map(|(x, y)| checked_add(*x, *y)).collect()
}

/// Element-wise difference; fails if any slot would go negative.
pub fn sub_vec(a: &[u128], b: &[u128]) -> VaultResult<Vec<u128>> {
    a.iter().zip(b).map(|(x, y)| checked_sub(*x, *y)).collect()
}

/// Element-wise `min(a, b)`.
pub fn min_vec(a: &[u128], b: &[u128]) -> Vec<u128> {
    a.iter().zip(b).map(|(x, y)| (*x).min(*y)).collect()
}

/// Scale every slot of `amounts` by `numerator / denominator`, rounded down.
pub fn scale_vec(amounts: &[u128], numerator: u128, denominator: u128) -> VaultResult<Vec<u128>> {
    amounts
        .iter()
        .map(|a| mul_div_down(*a, numerator, denominator))
        .collect()
}

pub fn is_zero(amounts: &[u128]) -> bool {
    amounts.iter().all(|a| *a == 0)
}

/// Shares worth `value` against a ledger holding `total_value` over `supply` shares.
/// Rounds down so the ledger never over-issues.
pub fn shares_for_value(value: u128, supply: u128, total_value: u128) -> VaultResult<u128> {
    mul_div_down(value, supply, total_value)
}

/// Value of `shares` out of `supply` shares backing `total_value`, rounded down.
pub fn value_of_shares(shares: u128, supply: u128, total_value: u128) -> VaultResult<u128> {
    if supply == 0 {
        return Ok(0);
    }
    mul_div_down(shares, total_value, supply)
}

/// WAD-scaled price of one share.
pub fn share_price(total_value: u128, supply: u128) -> VaultResult<u128> {
    if supply == 0 {
        return Ok(0);
    }
    mul_div_down(total_value, WAD, supply)
}

/// Shares that, once minted to a fee recipient, are worth exactly `fee_value`
/// of a ledger whose holders currently own `total_value` over `supply` shares:
/// `supply * fee / (total - fee)`.
pub fn fee_shares(fee_value: u128, supply: u128, total_value: u128) -> VaultResult<u128> {
    if fee_value == 0 || supply == 0 || fee_value >= total_value {
        return Ok(0);
    }
    mul_div_down(supply, fee_value, total_value - fee_value)
}
