//! Collaborator seams: the external systems the router drives.
//!
//! The router never holds tokens, swaps, or farms by itself; it speaks to
//! those systems through the four traits below and translates their
//! success flags into [`LedgerError`](trellis_core::LedgerError) at the
//! call site. Identities are always explicit arguments — there is no
//! ambient "caller" — so any transport or signing layer can sit in front.
//!
//! All methods take `&self`; implementations use interior mutability.
//! In-memory implementations for tests live in [`crate::testing`].

use trellis_core::types::{Amount, AssetId, ParticipantId, Role};

/// Token custody: balances, transfers, and delegated spending for the
/// share asset and every reward denomination, keyed by asset id.
pub trait FungibleAsset: Send + Sync {
    /// Moves `amount` of `asset` from `from` to `to`. `false` means the
    /// transfer did not happen and no balances changed.
    fn transfer(&self, asset: &AssetId, from: &ParticipantId, to: &ParticipantId, amount: Amount)
        -> bool;

    /// Moves `amount` from `from` to `to` against an allowance `from`
    /// granted to `spender`.
    fn transfer_from(
        &self,
        asset: &AssetId,
        spender: &ParticipantId,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> bool;

    fn balance_of(&self, asset: &AssetId, account: &ParticipantId) -> Amount;

    /// Grants `spender` the right to move up to `amount` of `owner`'s
    /// `asset`.
    fn approve(
        &self,
        asset: &AssetId,
        owner: &ParticipantId,
        spender: &ParticipantId,
        amount: Amount,
    ) -> bool;
}

/// Swap and liquidity venue. `None` results mean the venue refused the
/// operation; there is no slippage guarantee here — callers validate
/// quotes separately via [`crate::slippage::check_slippage`].
pub trait SwapVenue: Send + Sync {
    /// Expected output of swapping `amount_in` along `path` at current
    /// venue state, without executing.
    fn quote(&self, amount_in: Amount, path: &[AssetId]) -> Option<Amount>;

    /// Executes the swap and returns the realized output.
    fn convert(&self, amount_in: Amount, path: &[AssetId]) -> Option<Amount>;

    /// Supplies both sides of a pair; returns the LP amount issued.
    fn add_liquidity(
        &self,
        asset_a: &AssetId,
        asset_b: &AssetId,
        amount_a: Amount,
        amount_b: Amount,
    ) -> Option<Amount>;

    /// Burns `lp_amount` of a pair; returns the amounts released.
    fn remove_liquidity(
        &self,
        asset_a: &AssetId,
        asset_b: &AssetId,
        lp_amount: Amount,
    ) -> Option<(Amount, Amount)>;
}

/// The upstream staking farm that principal is parked in and that all
/// reward-token emissions ultimately come from. A `deposit`/`withdraw`
/// poke also pays out any pending rewards to the staker, so harvesting is
/// `withdraw(pool_id, 0)` and measuring the balance delta.
pub trait ExternalFarm: Send + Sync {
    fn deposit(&self, pool_id: u64, amount: Amount) -> bool;

    fn withdraw(&self, pool_id: u64, amount: Amount) -> bool;

    fn pending_reward(&self, pool_id: u64, account: &ParticipantId) -> Amount;
}

/// Capability check guarding privileged operations.
pub trait RoleGate: Send + Sync {
    fn has_role(&self, role: Role, account: &ParticipantId) -> bool;
}
