//! # Fixed-Point Scale
//!
//! All fractional bookkeeping in Trellis is integer math over a single
//! scale constant. Reward-per-share values are carried as
//! `reward * SCALE / total_shares`, and scaled back down with
//! `delta * shares / SCALE` when a participant settles.
//!
//! ## Worked example
//!
//! | Step | Expression | Value |
//! |------|------------|-------|
//! | inject 500 over 1,000 shares | `500 * SCALE / 1000` | `0.5 * SCALE` |
//! | pending for 1,000 shares | `0.5 * SCALE * 1000 / SCALE` | `500` |
//!
//! Intermediate products are computed in 256 bits so that `u128` operands
//! never overflow mid-multiplication; only a final result that cannot fit
//! back into `u128` is an error.

use primitive_types::U256;

use crate::error::{LedgerError, Result};
use crate::types::Amount;

/// Fixed-point scale for per-share accrual masks: 10^12.
///
/// Large enough that a single smallest-unit reward over a billion shares
/// still moves the mask; small enough that mask arithmetic stays far from
/// the `u128` ceiling for realistic supplies.
pub const SCALE: u128 = 1_000_000_000_000;

/// Denominator for basis-point fractions (1 bps = 0.01%).
pub const BPS_DENOM: u128 = 10_000;

/// Computes `value * numerator / denominator` with a 256-bit intermediate,
/// truncating toward zero.
pub fn mul_div(value: u128, numerator: u128, denominator: u128) -> Result<Amount> {
    if denominator == 0 {
        return Err(LedgerError::AmountOverflow);
    }
    let wide = U256::from(value) * U256::from(numerator) / U256::from(denominator);
    if wide > U256::from(u128::MAX) {
        return Err(LedgerError::AmountOverflow);
    }
    Ok(wide.as_u128())
}

/// Takes a basis-point cut of `amount`, truncating toward zero.
pub fn bps_of(amount: u128, bps: u16) -> Result<Amount> {
    mul_div(amount, bps as u128, BPS_DENOM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_round_trip_is_exact_for_even_division() {
        // 500 units over 1,000 shares: mask moves by half a SCALE.
        let mask_delta = mul_div(500, SCALE, 1_000).unwrap();
        assert_eq!(mask_delta, SCALE / 2);
        // A holder of all 1,000 shares gets the full 500 back.
        assert_eq!(mul_div(mask_delta, 1_000, SCALE).unwrap(), 500);
    }

    #[test]
    fn mul_div_truncates_toward_zero() {
        assert_eq!(mul_div(10, 1, 3).unwrap(), 3);
        assert_eq!(mul_div(0, SCALE, 7).unwrap(), 0);
    }

    #[test]
    fn mul_div_survives_u128_scale_products() {
        // value * numerator overflows u128 but the quotient fits.
        let big = u128::MAX / 2;
        assert_eq!(mul_div(big, 4, 8).unwrap(), big / 2);
    }

    #[test]
    fn mul_div_rejects_oversized_results_and_zero_denominator() {
        assert_eq!(mul_div(u128::MAX, 2, 1), Err(LedgerError::AmountOverflow));
        assert_eq!(mul_div(1, 1, 0), Err(LedgerError::AmountOverflow));
    }

    #[test]
    fn bps_cut_matches_percentage() {
        assert_eq!(bps_of(10_000, 250).unwrap(), 250); // 2.5%
        assert_eq!(bps_of(1_000, 10_000).unwrap(), 1_000); // 100%
        assert_eq!(bps_of(99, 100).unwrap(), 0); // truncates below one unit
    }

    proptest::proptest! {
        #[test]
        fn mask_round_trip_never_exceeds_injected(amount in 0u128..1_000_000_000_000u128,
                                                  shares in 1u128..1_000_000_000u128) {
            // Scaling up then back down loses only truncation dust.
            let mask = mul_div(amount, SCALE, shares).unwrap();
            let back = mul_div(mask, shares, SCALE).unwrap();
            proptest::prop_assert!(back <= amount);
            proptest::prop_assert!(amount - back < shares);
        }
    }
}
