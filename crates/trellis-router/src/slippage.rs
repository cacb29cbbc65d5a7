//! Quote staleness validation for swap-venue conversions.

use serde::{Deserialize, Serialize};

use trellis_core::scale::{mul_div, BPS_DENOM};
use trellis_core::types::{Amount, AssetId};
use trellis_core::{LedgerError, Result};

use crate::collaborators::SwapVenue;

/// One quoted conversion to revalidate: `quoted_out` is what the venue
/// promised for `quoted_in` along `path` when the quote was taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageCheck {
    pub path: Vec<AssetId>,
    pub quoted_in: Amount,
    pub quoted_out: Amount,
}

/// The smallest acceptable output for a quote under `tolerance_bps` of
/// slippage, truncating toward zero. Tolerances above 100% accept any
/// output.
pub fn min_out(quoted_out: Amount, tolerance_bps: u16) -> Result<Amount> {
    let tolerance = (tolerance_bps as u128).min(BPS_DENOM);
    mul_div(quoted_out, BPS_DENOM - tolerance, BPS_DENOM)
}

/// Re-quotes every check against the venue's live state and fails with
/// [`LedgerError::SlippageExceeded`] if any pair now pays less than
/// `quoted_out` minus the tolerance. A venue that refuses to quote fails
/// the whole batch.
pub fn check_slippage(
    venue: &dyn SwapVenue,
    checks: &[SlippageCheck],
    tolerance_bps: u16,
) -> Result<()> {
    for check in checks {
        let live = venue
            .quote(check.quoted_in, &check.path)
            .ok_or_else(|| LedgerError::TransferFailed("venue refused to quote".into()))?;
        if live < min_out(check.quoted_out, tolerance_bps)? {
            return Err(LedgerError::SlippageExceeded { quoted: check.quoted_out, live });
        }
    }
    Ok(())
}
