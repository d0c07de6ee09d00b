//! Conversion between base-ledger token units and L2 units.
//!
//! L2 tracks every token with a fixed number of decimals. Inbound amounts must
//! be exactly representable; outbound amounts are scaled back using the token's
//! own decimals.

use thiserror::Error;

/// Decimals of every L2 amount.
pub const L2_DECIMALS: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount {amount} is not representable with {decimals} token decimals on L2")]
    NotRepresentable { amount: u128, decimals: u8 },
    #[error("amount {amount} overflows when scaled for {decimals} token decimals")]
    Overflow { amount: u128, decimals: u8 },
}

fn scale(diff: u8, amount: u128, decimals: u8) -> Result<u128, AmountError> {
    10u128
        .checked_pow(u32::from(diff))
        .ok_or(AmountError::Overflow { amount, decimals })
}

/// Convert a base-ledger amount to L2 units. Dust below L2 precision is rejected.
pub fn to_l2_amount(l1_amount: u128, decimals: u8) -> Result<u128, AmountError> {
    if decimals >= L2_DECIMALS {
        let factor = scale(decimals - L2_DECIMALS, l1_amount, decimals)?;
        if l1_amount % factor != 0 {
            return Err(AmountError::NotRepresentable {
                amount: l1_amount,
                decimals,
            });
        }
        Ok(l1_amount / factor)
    } else {
        let factor = scale(L2_DECIMALS - decimals, l1_amount, decimals)?;
        l1_amount.checked_mul(factor).ok_or(AmountError::Overflow {
            amount: l1_amount,
            decimals,
        })
    }
}

/// Convert an L2 amount to base-ledger units, truncating when the token has
/// fewer decimals than L2.
pub fn to_l1_amount(l2_amount: u128, decimals: u8) -> Result<u128, AmountError> {
    if decimals >= L2_DECIMALS {
        let factor = scale(decimals - L2_DECIMALS, l2_amount, decimals)?;
        l2_amount.checked_mul(factor).ok_or(AmountError::Overflow {
            amount: l2_amount,
            decimals,
        })
    } else {
        let factor = scale(L2_DECIMALS - decimals, l2_amount, decimals)?;
        Ok(l2_amount / factor)
    }
}
